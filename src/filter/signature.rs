//! Attack signature scanner
//!
//! Evaluates the raw request path against a static table of
//! case-insensitive patterns. Each pattern captures the token that
//! identifies the probe (extension, path fragment, prefix), which becomes
//! the violation category. Independently, the remote-code-execution trigger
//! token is searched in path, query, referer and user agent.

use std::sync::LazyLock;

use regex::Regex;

use super::{Filter, FilterAction, Rejection};
use crate::recorder::ViolationRecorder;
use crate::request::{percent_decoded, RequestInfo};

/// Signature table. Capture group 1 of each pattern is the category.
pub const SIGNATURE_PATTERNS: &[&str] = &[
    // Executable, script, config and markup extensions, with anything after them
    r"(?i)^.+\.(action|asp|aspx|bat|cfm|cgi|conf|dat|dll|do|env|exe|git|go|[jpsx]?html?|ini|jsa|json|jsp|key|nsf|ntf|php|pl|sql|svn|swf|tpl|xml|xsl).*$",
    // Fragments of well-known scan targets
    r"(?i)^.*?(/\.ssh|/cgi/|/cgi-bin/|/dns-query|/etc/|id_dsa|id_rsa|/inc/|/includes|/modules?|/moin_static|/phpmyadmin|/qualys|/sites/|script|/themes?/|/typo3/|/twiki|/webapp|/wordpress).*$",
    // Root-level probe prefixes
    r"(?i)^(/cluster|/core|/lib/|/libraries|/login|/management|/misc|/styles|/system|/ui/|/uploads).*$",
];

/// JNDI lookup marker used by log4shell-style payloads.
pub const TRIGGER_TOKEN: &str = "jndi:";
pub const TRIGGER_CATEGORY: &str = "jndi";

pub const DEFAULT_LANDING_PAGE: &str = "/index.html";

static DEFAULT_SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    SIGNATURE_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("built-in signature pattern"))
        .collect()
});

pub struct SignatureScanner {
    signatures: Vec<Regex>,
    landing_page: String,
}

impl SignatureScanner {
    pub fn new(landing_page: impl Into<String>) -> Self {
        Self {
            signatures: DEFAULT_SIGNATURES.clone(),
            landing_page: landing_page.into(),
        }
    }

    /// Compiles a custom signature table.
    pub fn with_patterns<S: AsRef<str>>(
        patterns: &[S],
        landing_page: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let signatures = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            signatures,
            landing_page: landing_page.into(),
        })
    }

    /// Lowercased category of every signature the path matches, in its raw
    /// or percent-decoded form. Each category is reported once.
    pub fn scan_path(&self, path: &str) -> Vec<String> {
        let decoded = percent_decoded(path);
        if path == self.landing_page || decoded == self.landing_page {
            return Vec::new();
        }

        let mut categories: Vec<String> = Vec::new();
        for candidate in [path, &*decoded] {
            let matched = self
                .signatures
                .iter()
                .filter_map(|re| re.captures(candidate))
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_lowercase()));
            for category in matched {
                if !categories.contains(&category) {
                    categories.push(category);
                }
            }
        }
        categories
    }

    /// Whether any inspected part of the request carries the trigger token,
    /// raw or percent-decoded.
    pub fn has_trigger(&self, req: &RequestInfo) -> bool {
        [&req.path, &req.query, &req.referer, &req.user_agent]
            .into_iter()
            .any(|value| contains_trigger(value))
    }

    /// Categories to record for this request. Empty means clean.
    pub fn scan(&self, req: &RequestInfo) -> Vec<String> {
        let categories = self.scan_path(&req.path);
        if !categories.is_empty() {
            return categories;
        }
        if self.has_trigger(req) {
            return vec![TRIGGER_CATEGORY.to_string()];
        }
        Vec::new()
    }
}

impl Default for SignatureScanner {
    fn default() -> Self {
        Self::new(DEFAULT_LANDING_PAGE)
    }
}

fn contains_trigger(value: &str) -> bool {
    value.contains(TRIGGER_TOKEN) || percent_decoded(value).contains(TRIGGER_TOKEN)
}

/// Rejects requests carrying attack signatures and records each match.
pub struct SignatureFilter {
    scanner: SignatureScanner,
    recorder: ViolationRecorder,
}

impl SignatureFilter {
    pub fn new(scanner: SignatureScanner, recorder: ViolationRecorder) -> Self {
        Self { scanner, recorder }
    }
}

#[async_trait::async_trait]
impl Filter for SignatureFilter {
    async fn filter(&self, req: &RequestInfo) -> FilterAction {
        let categories = self.scanner.scan(req);
        if categories.is_empty() {
            return FilterAction::Allow;
        }
        for category in categories {
            tracing::info!(request = %req, category = %category, "Attack signature detected");
            self.recorder.record(category, req.ip.clone());
        }
        FilterAction::Deny(Rejection::SignatureViolation)
    }

    fn name(&self) -> &str {
        "signature"
    }
}
