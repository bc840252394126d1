//! Allow-list of legitimate application routes
//!
//! Ant-style patterns: `**` matches zero or more path segments, `*` exactly
//! one segment, anything else matches literally (case-sensitive).
//! Paths are matched in percent-decoded form, as the application routes them.

use super::{Filter, FilterAction, Rejection};
use crate::request::{percent_decoded, RequestInfo};

/// Routes served by the application behind the gatekeeper.
pub const DEFAULT_ALLOWED_PATHS: &[&str] = &[
    "/",
    "/actuator/**",
    "/api/**",
    "/error",
    "/index.html",
    "/knock",
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct RoutePattern {
    segments: Vec<String>,
}

impl RoutePattern {
    fn parse(pattern: &str) -> Self {
        Self {
            segments: split(pattern).map(str::to_string).collect(),
        }
    }

    fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = split(path).collect();
        let pattern: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        match_segments(&pattern, &path)
    }
}

fn split(path: &str) -> std::str::Split<'_, char> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((&segment, rest)) => match path.split_first() {
            Some((&head, tail)) => (segment == "*" || segment == head) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Set of route patterns; a path is allowed when any pattern matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    patterns: Vec<RoutePattern>,
}

impl AllowList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|p| RoutePattern::parse(p.as_ref()))
                .collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = percent_decoded(path);
        self.patterns.iter().any(|p| p.matches(&path))
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_PATHS)
    }
}

pub struct AllowListFilter {
    allow_list: AllowList,
}

impl AllowListFilter {
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }
}

#[async_trait::async_trait]
impl Filter for AllowListFilter {
    async fn filter(&self, req: &RequestInfo) -> FilterAction {
        if self.allow_list.matches(&req.path) {
            FilterAction::Allow
        } else {
            FilterAction::Deny(Rejection::AllowListViolation)
        }
    }

    fn name(&self) -> &str {
        "allow_list"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::tests::request_info;

    #[test]
    fn test_default_routes_allowed() {
        let allow_list = AllowList::default();
        for path in [
            "/",
            "/actuator",
            "/actuator/health",
            "/actuator/metrics/jvm.memory.used",
            "/api",
            "/api/",
            "/api/v1/users/42",
            "/error",
            "/index.html",
            "/knock",
        ] {
            assert!(allow_list.matches(path), "{path} should be allowed");
        }
    }

    #[test]
    fn test_unknown_routes_rejected() {
        let allow_list = AllowList::default();
        for path in [
            "/login",
            "/wp-admin/setup.php",
            "/apis",
            "/API/users",
            "/knock/again",
            "/error/",
            "//",
            "/index.htm",
        ] {
            assert!(!allow_list.matches(path), "{path} should be rejected");
        }
    }

    #[test]
    fn test_encoded_paths_matched_decoded() {
        let allow_list = AllowList::default();
        assert!(allow_list.matches("/%61pi/users"));
        assert!(allow_list.matches("/index%2Ehtml"));
        assert!(allow_list.matches("/api/%ff"));
        assert!(!allow_list.matches("/%6cogin"));
        assert!(!allow_list.matches("/%41PI/users"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        let allow_list = AllowList::new(&["/static/*/app.js", "/files/**/raw"]);
        assert!(allow_list.matches("/static/v2/app.js"));
        assert!(!allow_list.matches("/static/app.js"));
        assert!(!allow_list.matches("/static/a/b/app.js"));
        assert!(allow_list.matches("/files/raw"));
        assert!(allow_list.matches("/files/a/b/c/raw"));
        assert!(!allow_list.matches("/files/a/b/c"));
    }

    #[tokio::test]
    async fn test_filter_denies_unknown_path() {
        let filter = AllowListFilter::new(AllowList::default());

        let allowed = request_info("/api/orders?id=7", "", "");
        assert_eq!(filter.filter(&allowed).await, FilterAction::Allow);

        let denied = request_info("/cgi-bin/test.sh", "", "");
        assert_eq!(
            filter.filter(&denied).await,
            FilterAction::Deny(Rejection::AllowListViolation)
        );
    }
}
