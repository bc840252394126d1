//! Configuration management via environment variables
//!
//! Loads configuration from environment variables with .env file support.
//! Follows 12-factor app principles for cloud-native deployments.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::blocklist::BlocklistSettings;
use crate::downstream::firewall::DEFAULT_ALLOWED_METHODS;
use crate::error::{GatekeeperError, Result};
use crate::filter::allow_list::DEFAULT_ALLOWED_PATHS;
use crate::filter::signature::DEFAULT_LANDING_PAGE;
use crate::normalizer::DEFAULT_ERROR_PAGE;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    pub blocklist: BlocklistConfig,
    pub routes: RoutesConfig,
    pub firewall: FirewallConfig,
}

/// Server binding configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream application settings
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub upstream_url: String,
    pub timeout: Duration,
    pub preserve_host: bool,
}

/// Blocklist caches, recorder queue and flush schedule
#[derive(Debug, Clone)]
pub struct BlocklistConfig {
    pub block_ttl_secs: u64,
    pub window_secs: u64,
    pub threshold: u64,
    pub max_entries: u64,
    pub queue_capacity: usize,
    pub flush_interval_secs: u64,
}

/// Allow-list, scan exemption and error page
#[derive(Debug, Clone)]
pub struct RoutesConfig {
    pub allowed_paths: Vec<String>,
    pub landing_page: String,
    pub error_page: String,
}

/// Strict firewall settings
#[derive(Debug, Clone)]
pub struct FirewallConfig {
    pub allowed_methods: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Reads .env file if present, then parses environment variables.
    /// Returns error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            server: ServerConfig::from_env()?,
            proxy: ProxyConfig::from_env()?,
            blocklist: BlocklistConfig::from_env()?,
            routes: RoutesConfig::from_env()?,
            firewall: FirewallConfig::from_env()?,
        })
    }
}

fn var_or<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|e| GatekeeperError::Config(format!("Invalid {}: {}", name, e)))
}

fn positive<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: Display,
{
    let value = var_or::<T>(name, default)?;
    if value <= T::default() {
        return Err(GatekeeperError::Config(format!("{} must be at least 1", name)));
    }
    Ok(value)
}

fn list_or(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = var_or::<u16>("SERVER_PORT", "8080")?;

        Ok(Self { host, port })
    }
}

impl ProxyConfig {
    fn from_env() -> Result<Self> {
        let upstream_url = env::var("PROXY_UPSTREAM_URL")
            .map_err(|_| GatekeeperError::Config("PROXY_UPSTREAM_URL is required".to_string()))?;

        let timeout_secs = var_or::<u64>("PROXY_TIMEOUT_SECS", "30")?;
        let preserve_host = var_or::<bool>("PROXY_PRESERVE_HOST", "false")?;

        Ok(Self {
            upstream_url,
            timeout: Duration::from_secs(timeout_secs),
            preserve_host,
        })
    }
}

impl BlocklistConfig {
    fn from_env() -> Result<Self> {
        Ok(Self {
            block_ttl_secs: positive("BLOCKLIST_BLOCK_TTL_SECS", "3600")?,
            window_secs: positive("BLOCKLIST_WINDOW_SECS", "300")?,
            threshold: positive("BLOCKLIST_THRESHOLD", "10")?,
            max_entries: positive("BLOCKLIST_MAX_ENTRIES", "10000")?,
            queue_capacity: positive("BLOCKLIST_QUEUE_CAPACITY", "1024")?,
            flush_interval_secs: positive("BLOCKLIST_FLUSH_INTERVAL_SECS", "3600")?,
        })
    }

    pub fn settings(&self) -> BlocklistSettings {
        BlocklistSettings {
            block_ttl: Duration::from_secs(self.block_ttl_secs),
            window: Duration::from_secs(self.window_secs),
            threshold: self.threshold,
            max_entries: self.max_entries,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl RoutesConfig {
    fn from_env() -> Result<Self> {
        let allowed_paths = list_or("GATEKEEPER_ALLOWED_PATHS", DEFAULT_ALLOWED_PATHS);
        if let Some(bad) = allowed_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(GatekeeperError::Config(format!(
                "Invalid GATEKEEPER_ALLOWED_PATHS entry '{}': must start with '/'",
                bad
            )));
        }

        let landing_page =
            env::var("GATEKEEPER_LANDING_PAGE").unwrap_or_else(|_| DEFAULT_LANDING_PAGE.to_string());
        let error_page =
            env::var("GATEKEEPER_ERROR_PAGE").unwrap_or_else(|_| DEFAULT_ERROR_PAGE.to_string());

        Ok(Self {
            allowed_paths,
            landing_page,
            error_page,
        })
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            allowed_paths: DEFAULT_ALLOWED_PATHS.iter().map(|s| s.to_string()).collect(),
            landing_page: DEFAULT_LANDING_PAGE.to_string(),
            error_page: DEFAULT_ERROR_PAGE.to_string(),
        }
    }
}

impl FirewallConfig {
    fn from_env() -> Result<Self> {
        let allowed_methods: Vec<String> = list_or("FIREWALL_ALLOWED_METHODS", DEFAULT_ALLOWED_METHODS)
            .into_iter()
            .map(|m| m.to_uppercase())
            .collect();

        if let Some(bad) = allowed_methods
            .iter()
            .find(|m| hyper::Method::from_bytes(m.as_bytes()).is_err())
        {
            return Err(GatekeeperError::Config(format!(
                "Invalid FIREWALL_ALLOWED_METHODS entry '{}'",
                bad
            )));
        }

        Ok(Self { allowed_methods })
    }
}
