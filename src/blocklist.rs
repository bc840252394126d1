//! Adaptive IP blocklist
//!
//! Four expiring, capacity-bounded caches owned behind one lock:
//! - blocked IPs (hard block, long TTL)
//! - hits against blocked IPs (reporting only)
//! - blocked requests by reason (reporting only)
//! - conspicuous IPs (violations inside the short escalation window)
//!
//! An IP whose conspicuous count reaches the threshold is promoted into the
//! blocked set. The hourly flush resets the two reporting caches and leaves
//! blocking state to decay on its own TTL.

use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use moka::sync::Cache;
use tracing::{info, warn};

/// Tunables for the blocklist caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistSettings {
    /// TTL of blocked IPs and of both reporting counters
    pub block_ttl: Duration,
    /// TTL of conspicuous IP counters (the escalation window)
    pub window: Duration,
    /// Conspicuous count at which an IP is blocked
    pub threshold: u64,
    /// Upper bound on entries per cache
    pub max_entries: u64,
}

impl Default for BlocklistSettings {
    fn default() -> Self {
        Self {
            block_ttl: Duration::from_secs(60 * 60),
            window: Duration::from_secs(5 * 60),
            threshold: 10,
            max_entries: 10_000,
        }
    }
}

/// Result of recording one violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationOutcome {
    /// Conspicuous count after the increment, `None` when no IP was known
    pub conspicuous: Option<u64>,
    /// The IP is (still) at or above the threshold and was written to the blocked set
    pub blocked: bool,
}

/// Summary produced by a statistics flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Requests per reason, sorted by reason
    pub reasons: Vec<(String, u64)>,
    pub blocked_requests: u64,
    /// Requests rejected per already-blocked IP, sorted by IP
    pub blocked_ips: Vec<(String, u64)>,
    pub blocked_ip_requests: u64,
}

struct Ledger {
    blocked_ips: Cache<String, ()>,
    blocked_ip_hits: Cache<String, u64>,
    blocked_reasons: Cache<String, u64>,
    conspicuous_ips: Cache<String, u64>,
}

/// Thread-safe owner of all blocking and reporting state.
pub struct Blocklist {
    settings: BlocklistSettings,
    ledger: Mutex<Ledger>,
}

impl Blocklist {
    pub fn new(settings: BlocklistSettings) -> Self {
        let ledger = Ledger {
            blocked_ips: expiring(&settings, settings.block_ttl),
            blocked_ip_hits: expiring(&settings, settings.block_ttl),
            blocked_reasons: expiring(&settings, settings.block_ttl),
            conspicuous_ips: expiring(&settings, settings.window),
        };
        Self {
            settings,
            ledger: Mutex::new(ledger),
        }
    }

    /// Reports whether `ip` is blocked, counting the hit when it is.
    pub fn is_blocked(&self, ip: &str) -> bool {
        if ip.is_empty() {
            return false;
        }
        let ledger = self.ledger();
        if ledger.blocked_ips.get(ip).is_none() {
            return false;
        }
        increment(&ledger.blocked_ip_hits, ip);
        true
    }

    /// Counts one violation under `category` and escalates `ip` when it
    /// reaches the threshold. Category keys are lowercased.
    pub fn record_violation(&self, category: &str, ip: &str) -> ViolationOutcome {
        let category = category.to_lowercase();
        let ledger = self.ledger();
        increment(&ledger.blocked_reasons, &category);

        if ip.is_empty() {
            return ViolationOutcome {
                conspicuous: None,
                blocked: false,
            };
        }

        let count = increment(&ledger.conspicuous_ips, ip);
        let blocked = count >= self.settings.threshold;
        if blocked {
            if ledger.blocked_ips.get(ip).is_none() {
                warn!(ip, count, category = %category, "IP promoted to blocklist");
            }
            ledger.blocked_ips.insert(ip.to_string(), ());
        }

        ViolationOutcome {
            conspicuous: Some(count),
            blocked,
        }
    }

    /// Logs and resets the reporting counters. Blocked and conspicuous IPs
    /// are left to expire on their own.
    pub fn flush(&self) -> FlushReport {
        let mut ledger = self.ledger();

        let reasons = sorted_entries(&ledger.blocked_reasons);
        let blocked_requests: u64 = reasons.iter().map(|(_, count)| count).sum();
        for (reason, count) in &reasons {
            info!(reason = %reason, count, "'{reason}' was blocked {count} times within the last period");
        }
        if blocked_requests > 0 {
            info!(total = blocked_requests, "{blocked_requests} requests blocked at all");
        }
        ledger.blocked_reasons = expiring(&self.settings, self.settings.block_ttl);

        let blocked_ips = sorted_entries(&ledger.blocked_ip_hits);
        let blocked_ip_requests: u64 = blocked_ips.iter().map(|(_, count)| count).sum();
        for (ip, count) in &blocked_ips {
            info!(ip = %ip, count, "IP {ip} was blocked {count} times within the last period");
        }
        if blocked_ip_requests > 0 {
            info!(total = blocked_ip_requests, "{blocked_ip_requests} requests blocked by IP");
        }
        ledger.blocked_ip_hits = expiring(&self.settings, self.settings.block_ttl);

        FlushReport {
            reasons,
            blocked_requests,
            blocked_ips,
            blocked_ip_requests,
        }
    }

    /// Read-only lookups for diagnostics and tests. None of them count as a hit.
    pub fn contains_blocked(&self, ip: &str) -> bool {
        self.ledger().blocked_ips.contains_key(ip)
    }

    pub fn conspicuous_count(&self, ip: &str) -> u64 {
        self.ledger().conspicuous_ips.get(ip).unwrap_or(0)
    }

    pub fn blocked_hits(&self, ip: &str) -> u64 {
        self.ledger().blocked_ip_hits.get(ip).unwrap_or(0)
    }

    pub fn reason_count(&self, category: &str) -> u64 {
        self.ledger()
            .blocked_reasons
            .get(&category.to_lowercase())
            .unwrap_or(0)
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new(BlocklistSettings::default())
    }
}

fn expiring<V>(settings: &BlocklistSettings, ttl: Duration) -> Cache<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(settings.max_entries)
        .time_to_live(ttl)
        .build()
}

// Callers hold the ledger lock, so the read and the write cannot interleave.
fn increment(cache: &Cache<String, u64>, key: &str) -> u64 {
    let count = cache.get(key).unwrap_or(0) + 1;
    cache.insert(key.to_string(), count);
    count
}

fn sorted_entries<K, V>(cache: &Cache<K, V>) -> Vec<(K, V)>
where
    K: Hash + Eq + Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut entries: Vec<(K, V)> = cache
        .iter()
        .map(|(key, value)| (K::clone(&key), value))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}
