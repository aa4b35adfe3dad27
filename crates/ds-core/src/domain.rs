//! Whitelist parsing and hostname matching
//!
//! Matching is a coarse two-label heuristic, not a Public Suffix List lookup:
//! a hostname is covered by a whitelist entry when it is equal to it, a
//! subdomain of it, or shares its last two labels.
//!
//! # Examples
//!
//! ```
//! use ds_core::domain::{get_base_domain, is_whitelisted};
//!
//! assert_eq!(get_base_domain("shop.example.com"), "example.com");
//! assert!(is_whitelisted("shop.example.com", "example.com"));
//! assert!(!is_whitelisted("notexample.com", "example.com"));
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use crate::clock::{Clock, SystemClock};

// =============================================================================
// Limits
// =============================================================================

/// Age after which a cached match result is recomputed.
pub const MATCH_CACHE_TTL_MS: i64 = 300_000;
/// Maximum number of cached `(hostname, whitelist)` results.
pub const MATCH_CACHE_CAPACITY: usize = 50;
/// Maximum number of cached base domains.
pub const BASE_DOMAIN_CACHE_CAPACITY: usize = 100;
/// Maximum number of whitelist entries kept after validation.
pub const MAX_WHITELIST_ENTRIES: usize = 100;
/// Entries must be strictly shorter than this.
pub const MAX_DOMAIN_LEN: usize = 255;

/// Whitelist tokens that cover pages without a network hostname.
pub const LOCAL_DOMAINS: &[&str] = &["localhost", "local", "file", "127.0.0.1"];

/// Validated, lowercased whitelist entries in input order.
pub type WhitelistEntries = Vec<String>;

// =============================================================================
// Bounded Cache
// =============================================================================

/// Fixed-capacity map that stops accepting new keys once full.
///
/// Nothing is ever evicted; a full cache keeps serving what it has and
/// silently drops further inserts until [`BoundedCache::clear`].
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key)
    }

    /// Insert a value. Returns `false` when the cache is full.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy)]
struct MatchEntry {
    result: bool,
    timestamp_ms: i64,
}

// =============================================================================
// Whitelist Parsing
// =============================================================================

/// Parse a newline-separated whitelist into validated entries.
///
/// Invalid lines are dropped and the result is capped at
/// [`MAX_WHITELIST_ENTRIES`]. Never fails.
pub fn parse_whitelist(raw: &str) -> WhitelistEntries {
    raw.split('\n')
        .map(|line| line.trim().to_lowercase())
        .filter(|domain| is_valid_entry(domain))
        .take(MAX_WHITELIST_ENTRIES)
        .collect()
}

fn is_valid_entry(domain: &str) -> bool {
    !domain.is_empty()
        && domain.chars().count() < MAX_DOMAIN_LEN
        && !domain.contains("..")
        && !domain.starts_with('.')
        && !domain.contains(['<', '>', '\'', '"', '&'])
        && !is_ipv4_literal(domain)
}

/// Dotted-quad of digit runs, e.g. `10.0.0.1` (ranges are not checked).
fn is_ipv4_literal(s: &str) -> bool {
    let mut parts = 0;
    for part in s.split('.') {
        parts += 1;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    parts == 4
}

/// Last two labels of a hostname, or the hostname itself.
fn compute_base_domain(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').collect();
    let n = labels.len();
    if n <= 2 {
        return hostname.to_string();
    }
    labels[n - 2..].join(".")
}

// =============================================================================
// Domain Matcher
// =============================================================================

/// Whitelist matcher with its two memoization layers.
#[derive(Debug)]
pub struct DomainMatcher<C: Clock = SystemClock> {
    clock: C,
    base_domains: BoundedCache<String, String>,
    matches: BoundedCache<(String, String), MatchEntry>,
}

impl DomainMatcher<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for DomainMatcher<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> DomainMatcher<C> {
    /// Create a matcher whose cache expiry follows `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            base_domains: BoundedCache::new(BASE_DOMAIN_CACHE_CAPACITY),
            matches: BoundedCache::new(MATCH_CACHE_CAPACITY),
        }
    }

    /// Get the base domain (last two labels) of a hostname.
    pub fn base_domain(&mut self, hostname: &str) -> String {
        if let Some(cached) = self.base_domains.get(hostname) {
            return cached.clone();
        }

        let base = compute_base_domain(hostname);
        self.base_domains.insert(hostname.to_string(), base.clone());
        base
    }

    /// Check whether `hostname` is covered by the raw whitelist text.
    ///
    /// Results are cached per `(hostname, raw)` for five minutes, so edits
    /// to a whitelist that is already cached may take that long to apply.
    pub fn is_whitelisted(&mut self, hostname: &str, raw: &str) -> bool {
        let now = self.clock.now_ms();
        let key = (hostname.to_string(), raw.to_string());

        if let Some(entry) = self.matches.get(&key) {
            if now - entry.timestamp_ms < MATCH_CACHE_TTL_MS {
                log::debug!("whitelist cache hit for '{}'", hostname);
                return entry.result;
            }
        }

        let result = self.compute_whitelisted(hostname, raw);

        if !self.matches.insert(key, MatchEntry { result, timestamp_ms: now }) {
            log::debug!("whitelist cache full, not caching '{}'", hostname);
        }

        result
    }

    fn compute_whitelisted(&mut self, hostname: &str, raw: &str) -> bool {
        // Empty whitelist means nothing is whitelisted
        if raw.trim().is_empty() {
            return false;
        }

        let domains = parse_whitelist(raw);

        // file://, browser-internal pages
        if hostname.is_empty() {
            return domains
                .iter()
                .any(|d| LOCAL_DOMAINS.contains(&d.as_str()));
        }

        if domains.is_empty() {
            return false;
        }

        self.check_domain_match(&hostname.to_lowercase(), &domains)
    }

    /// Match a lowercase hostname against parsed whitelist entries.
    pub fn check_domain_match(&mut self, hostname: &str, domains: &[String]) -> bool {
        let host_base = self.base_domain(hostname);

        for domain in domains {
            if hostname == domain {
                return true;
            }

            if hostname
                .strip_suffix(domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
            {
                return true;
            }

            if host_base == *domain || host_base == self.base_domain(domain) {
                return true;
            }
        }

        false
    }

    /// Drop every cached base domain and match result.
    pub fn clear_caches(&mut self) {
        self.base_domains.clear();
        self.matches.clear();
    }

    pub fn cached_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn cached_base_domains(&self) -> usize {
        self.base_domains.len()
    }
}

// =============================================================================
// Global Matcher
// =============================================================================

static MATCHER: RwLock<Option<DomainMatcher>> = RwLock::new(None);

fn with_global<R>(f: impl FnOnce(&mut DomainMatcher) -> R) -> R {
    let mut guard = MATCHER.write().unwrap_or_else(PoisonError::into_inner);
    f(guard.get_or_insert_with(DomainMatcher::new))
}

/// Check a hostname against a raw whitelist using the process-wide caches.
pub fn is_whitelisted(hostname: &str, raw: &str) -> bool {
    with_global(|matcher| matcher.is_whitelisted(hostname, raw))
}

/// Get the base domain of a hostname using the process-wide cache.
pub fn get_base_domain(hostname: &str) -> String {
    with_global(|matcher| matcher.base_domain(hostname))
}

/// Clear the process-wide caches.
pub fn clear_caches() {
    with_global(|matcher| matcher.clear_caches());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;

    fn matcher() -> (Arc<ManualClock>, DomainMatcher<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let matcher = DomainMatcher::with_clock(Arc::clone(&clock));
        (clock, matcher)
    }

    #[test]
    fn test_parse_whitelist_trims_and_lowercases() {
        let parsed = parse_whitelist("  Example.COM \r\nfoo.org\n\n");
        assert_eq!(parsed, vec!["example.com", "foo.org"]);
    }

    #[test]
    fn test_parse_whitelist_drops_invalid_entries() {
        let raw = "good.com\n<script>alert(1)</script>\n.leading.com\na..b.com\n\
                   192.168.0.1\nquote\"d.com\namp&.com\nlocalhost";
        assert_eq!(parse_whitelist(raw), vec!["good.com", "localhost"]);
    }

    #[test]
    fn test_parse_whitelist_length_limit() {
        let long = "a".repeat(254);
        let too_long = "b".repeat(255);
        let parsed = parse_whitelist(&format!("{long}\n{too_long}"));
        assert_eq!(parsed, vec![long]);
    }

    #[test]
    fn test_parse_whitelist_caps_entries() {
        let raw: Vec<String> = (0..150).map(|i| format!("site{i}.com")).collect();
        let parsed = parse_whitelist(&raw.join("\n"));
        assert_eq!(parsed.len(), MAX_WHITELIST_ENTRIES);
        assert_eq!(parsed[0], "site0.com");
        assert_eq!(parsed[99], "site99.com");
    }

    #[test]
    fn test_parse_whitelist_empty() {
        assert!(parse_whitelist("").is_empty());
        assert!(parse_whitelist(" \n\t\n").is_empty());
    }

    #[test]
    fn test_ipv4_literal() {
        assert!(is_ipv4_literal("127.0.0.1"));
        assert!(is_ipv4_literal("999.1.2.3"));
        assert!(!is_ipv4_literal("1.2.3"));
        assert!(!is_ipv4_literal("1.2.3.4.5"));
        assert!(!is_ipv4_literal("1.2.3.a"));
    }

    #[test]
    fn test_base_domain() {
        let (_, mut m) = matcher();
        assert_eq!(m.base_domain("example.com"), "example.com");
        assert_eq!(m.base_domain("a.b.example.com"), "example.com");
        assert_eq!(m.base_domain("example.co.uk"), "co.uk");
        assert_eq!(m.base_domain("localhost"), "localhost");
        assert_eq!(m.base_domain(""), "");
    }

    #[test]
    fn test_subdomain_matches_parent() {
        let (_, mut m) = matcher();
        assert!(m.is_whitelisted("shop.example.com", "example.com"));
    }

    #[test]
    fn test_parent_matches_subdomain_entry() {
        let (_, mut m) = matcher();
        assert!(m.is_whitelisted("example.com", "shop.example.com"));
    }

    #[test]
    fn test_suffix_without_dot_does_not_match() {
        let (_, mut m) = matcher();
        assert!(!m.is_whitelisted("notexample.com", "example.com"));
    }

    #[test]
    fn test_shared_two_label_base_matches() {
        let (_, mut m) = matcher();
        assert!(m.is_whitelisted("example.co.uk", "www.example.co.uk"));
        // The heuristic is deliberately coarse.
        assert!(m.is_whitelisted("other.co.uk", "www.example.co.uk"));
    }

    #[test]
    fn test_hostname_is_lowercased() {
        let (_, mut m) = matcher();
        assert!(m.is_whitelisted("WWW.Example.COM", "example.com"));
    }

    #[test]
    fn test_empty_whitelist_matches_nothing() {
        let (_, mut m) = matcher();
        for host in ["", "example.com", "localhost"] {
            assert!(!m.is_whitelisted(host, ""));
            assert!(!m.is_whitelisted(host, "   \n  "));
        }
    }

    #[test]
    fn test_whitelist_of_only_invalid_entries_matches_nothing() {
        let (_, mut m) = matcher();
        assert!(!m.is_whitelisted("example.com", "<b>\n10.0.0.1"));
    }

    #[test]
    fn test_empty_hostname_uses_local_tokens() {
        let (_, mut m) = matcher();
        assert!(m.is_whitelisted("", "file"));
        assert!(m.is_whitelisted("", "example.com\nlocalhost"));
        assert!(!m.is_whitelisted("", "example.com"));
        // 127.0.0.1 is rejected as an IP literal before the local check
        assert!(!m.is_whitelisted("", "127.0.0.1"));
    }

    #[test]
    fn test_repeated_lookups_are_stable() {
        let (clock, mut m) = matcher();
        let first = m.is_whitelisted("a.example.com", "example.com");
        clock.advance(60_000);
        assert_eq!(m.is_whitelisted("a.example.com", "example.com"), first);
        assert_eq!(m.cached_matches(), 1);
    }

    #[test]
    fn test_cache_entry_expires_after_ttl() {
        let (clock, mut m) = matcher();
        m.is_whitelisted("a.example.com", "example.com");
        clock.advance(MATCH_CACHE_TTL_MS);
        // Expired entry is recomputed and refreshed in place
        assert!(m.is_whitelisted("a.example.com", "example.com"));
        assert_eq!(m.cached_matches(), 1);
    }

    #[test]
    fn test_bounded_cache_drops_inserts_when_full() {
        let mut cache = BoundedCache::new(2);
        assert!(cache.is_empty());
        assert!(cache.insert("a", 1));
        assert!(cache.insert("b", 2));
        assert!(!cache.insert("c", 3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("c"), None);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.insert("c", 3));
    }

    #[test]
    fn test_match_cache_stops_inserting_when_full() {
        let (_, mut m) = matcher();
        for i in 0..(MATCH_CACHE_CAPACITY + 10) {
            m.is_whitelisted(&format!("host{i}.com"), "example.com");
        }
        assert_eq!(m.cached_matches(), MATCH_CACHE_CAPACITY);
        // Uncached lookups still compute correct results
        assert!(m.is_whitelisted("late.example.com", "example.com"));
        assert_eq!(m.cached_matches(), MATCH_CACHE_CAPACITY);
    }

    #[test]
    fn test_base_domain_cache_stops_inserting_when_full() {
        let (_, mut m) = matcher();
        for i in 0..(BASE_DOMAIN_CACHE_CAPACITY + 20) {
            m.base_domain(&format!("a.host{i}.com"));
        }
        assert_eq!(m.cached_base_domains(), BASE_DOMAIN_CACHE_CAPACITY);
        assert_eq!(m.base_domain("x.y.uncached.org"), "uncached.org");
    }

    #[test]
    fn test_clear_caches() {
        let (_, mut m) = matcher();
        m.is_whitelisted("a.example.com", "example.com");
        assert!(m.cached_matches() > 0);
        assert!(m.cached_base_domains() > 0);
        m.clear_caches();
        assert_eq!(m.cached_matches(), 0);
        assert_eq!(m.cached_base_domains(), 0);
    }

    #[test]
    fn test_global_functions() {
        assert!(is_whitelisted("docs.rust-lang.org", "rust-lang.org"));
        assert_eq!(get_base_domain("docs.rust-lang.org"), "rust-lang.org");
        clear_caches();
        assert!(!is_whitelisted("docs.rust-lang.org", ""));
    }
}
