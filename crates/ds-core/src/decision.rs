//! Injection and reload decisions

use crate::clock::Clock;
use crate::domain::{self, DomainMatcher};
use crate::page::{PageContext, DATE_ATTRIBUTE};
use crate::settings::SpoofSettings;
use crate::url::{extract_scheme, page_hostname, PageScheme};

/// Whether the override should be installed on a page at `hostname`.
pub fn decide(settings: &SpoofSettings, hostname: &str) -> bool {
    decide_by(settings, hostname, domain::is_whitelisted)
}

/// [`decide`] against an owned matcher.
pub fn decide_with<C: Clock>(matcher: &mut DomainMatcher<C>, settings: &SpoofSettings, hostname: &str) -> bool {
    decide_by(settings, hostname, |host, raw| matcher.is_whitelisted(host, raw))
}

fn decide_by(settings: &SpoofSettings, hostname: &str, mut whitelisted: impl FnMut(&str, &str) -> bool) -> bool {
    if !settings.is_active() {
        return false;
    }
    if !settings.whitelist_enabled {
        return true;
    }
    whitelisted(hostname, &settings.whitelist)
}

/// Whether a tab at `tab_url` should be reloaded after a settings change.
///
/// Browser-internal pages never reload. Without a whitelist every http,
/// https and file page reloads; with one, the page's hostname must match
/// (`file:` pages use the empty hostname).
pub fn should_reload(tab_url: &str, whitelist_enabled: bool, whitelist: &str) -> bool {
    should_reload_by(tab_url, whitelist_enabled, whitelist, domain::is_whitelisted)
}

/// [`should_reload`] against an owned matcher.
pub fn should_reload_with<C: Clock>(
    matcher: &mut DomainMatcher<C>,
    tab_url: &str,
    whitelist_enabled: bool,
    whitelist: &str,
) -> bool {
    should_reload_by(tab_url, whitelist_enabled, whitelist, |host, raw| {
        matcher.is_whitelisted(host, raw)
    })
}

fn should_reload_by(
    tab_url: &str,
    whitelist_enabled: bool,
    whitelist: &str,
    mut whitelisted: impl FnMut(&str, &str) -> bool,
) -> bool {
    let Some(scheme) = extract_scheme(tab_url) else {
        return false;
    };
    if scheme == PageScheme::BrowserInternal {
        return false;
    }
    if !whitelist_enabled {
        return scheme.is_injectable();
    }
    match page_hostname(tab_url) {
        Some(hostname) => whitelisted(&hostname, whitelist),
        None => false,
    }
}

/// Whether a tab is eligible for cleanup when spoofing is switched off.
/// Only http(s) pages ever receive the cleanup script.
pub fn should_cleanup(tab_url: &str) -> bool {
    matches!(extract_scheme(tab_url), Some(PageScheme::Http | PageScheme::Https))
}

/// The date handed to the override. `None` lets it fall back to tomorrow.
pub fn injected_date(settings: &SpoofSettings) -> Option<&str> {
    settings.target_date.as_deref()
}

/// Hand the requested date to the page ahead of installing the override.
///
/// Returns false (and leaves the page alone) when the override should not be
/// installed on this page.
pub fn stage_injection(page: &mut PageContext, settings: &SpoofSettings) -> bool {
    if !decide(settings, page.hostname()) {
        return false;
    }
    if let Some(date) = injected_date(settings) {
        page.set_attribute(DATE_ATTRIBUTE, date);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn settings(enabled: bool, quick: bool, whitelist_enabled: bool, whitelist: &str) -> SpoofSettings {
        SpoofSettings {
            enabled,
            quick_enabled: quick,
            target_date: None,
            whitelist_enabled,
            whitelist: whitelist.to_string(),
        }
    }

    fn matcher() -> DomainMatcher<ManualClock> {
        DomainMatcher::with_clock(ManualClock::new(0))
    }

    #[test]
    fn test_disabled_never_injects() {
        let mut m = matcher();
        assert!(!decide_with(&mut m, &settings(false, false, false, ""), "example.com"));
        assert!(!decide_with(&mut m, &settings(false, false, true, "example.com"), "example.com"));
    }

    #[test]
    fn test_no_whitelist_injects_everywhere() {
        let mut m = matcher();
        assert!(decide_with(&mut m, &settings(true, false, false, ""), "example.com"));
        assert!(decide_with(&mut m, &settings(false, true, false, ""), ""));
    }

    #[test]
    fn test_whitelist_filters_hosts() {
        let mut m = matcher();
        let s = settings(false, true, true, "example.com");
        assert!(decide_with(&mut m, &s, "www.example.com"));
        assert!(!decide_with(&mut m, &s, "other.org"));
    }

    #[test]
    fn test_empty_whitelist_matches_nothing() {
        let mut m = matcher();
        let s = settings(true, false, true, "   ");
        assert!(!decide_with(&mut m, &s, "example.com"));
        assert!(!decide_with(&mut m, &s, ""));
    }

    #[test]
    fn test_should_reload_without_whitelist() {
        let mut m = matcher();
        assert!(should_reload_with(&mut m, "https://example.com/", false, ""));
        assert!(should_reload_with(&mut m, "http://example.com/", false, ""));
        assert!(should_reload_with(&mut m, "file:///tmp/a.html", false, ""));
        assert!(!should_reload_with(&mut m, "about:blank", false, ""));
        assert!(!should_reload_with(&mut m, "chrome://settings", false, ""));
        assert!(!should_reload_with(&mut m, "chrome-extension://abc/popup.html", false, ""));
        assert!(!should_reload_with(&mut m, "not a url", false, ""));
    }

    #[test]
    fn test_should_reload_with_whitelist() {
        let mut m = matcher();
        assert!(should_reload_with(&mut m, "https://docs.example.com/x", true, "example.com"));
        assert!(!should_reload_with(&mut m, "https://other.org/", true, "example.com"));
        assert!(!should_reload_with(&mut m, "chrome://newtab", true, "localhost"));
        assert!(should_reload_with(&mut m, "file:///tmp/a.html", true, "file"));
        assert!(!should_reload_with(&mut m, "file:///tmp/a.html", true, "example.com"));
    }

    #[test]
    fn test_should_cleanup() {
        assert!(should_cleanup("https://example.com"));
        assert!(should_cleanup("http://example.com"));
        assert!(!should_cleanup("file:///tmp/a.html"));
        assert!(!should_cleanup("chrome://settings"));
    }

    #[test]
    fn test_injected_date() {
        let mut s = settings(true, false, false, "");
        assert_eq!(injected_date(&s), None);
        s.target_date = Some("2026-03-15".into());
        assert_eq!(injected_date(&s), Some("2026-03-15"));
    }
}
