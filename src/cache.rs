//! Cache Policy (spec §4.D): `Cache-Control`/`ETag`/`Last-Modified`/`Vary`
//! computation and conditional-GET evaluation.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Public,
    Private,
    NoStore,
}

impl CacheMode {
    fn directive(&self) -> &'static str {
        match self {
            CacheMode::Public => "public, max-age=0, must-revalidate",
            CacheMode::Private => "private, max-age=0, must-revalidate",
            CacheMode::NoStore => "no-store",
        }
    }
}

/// The cache-relevant headers for one response, computed once per request.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub cache_control: &'static str,
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub vary: &'static str,
}

impl CachePolicy {
    pub fn new(mode: CacheMode, head_offset: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            cache_control: mode.directive(),
            etag: etag_for(head_offset),
            last_modified,
            vary: "Accept",
        }
    }

    pub fn no_store() -> Self {
        Self {
            cache_control: CacheMode::NoStore.directive(),
            etag: String::new(),
            last_modified: None,
            vary: "Accept",
        }
    }

    /// `true` when the client's `If-None-Match` already matches this
    /// response's ETag; the caller should respond 304 with an empty body.
    pub fn matches_if_none_match(&self, if_none_match: Option<&str>) -> bool {
        match if_none_match {
            Some(value) => value
                .split(',')
                .map(|v| v.trim())
                .any(|v| v == self.etag || v == "*"),
            None => false,
        }
    }
}

/// `ETag` is the stream's current head offset, quoted per RFC 7232.
pub fn etag_for(head_offset: u64) -> String {
    format!("\"{head_offset}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_matches_head_offset() {
        assert_eq!(etag_for(42), "\"42\"");
    }

    #[test]
    fn if_none_match_matches_current_etag() {
        let policy = CachePolicy::new(CacheMode::Private, 5, None);
        assert!(policy.matches_if_none_match(Some("\"5\"")));
        assert!(!policy.matches_if_none_match(Some("\"4\"")));
        assert!(policy.matches_if_none_match(Some("*")));
    }

    #[test]
    fn no_store_mode_has_no_cacheable_etag_semantics() {
        let policy = CachePolicy::no_store();
        assert_eq!(policy.cache_control, "no-store");
    }
}
