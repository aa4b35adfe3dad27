//! Cleanup driver
//!
//! Removes every trace of an override from a page, verifying after each
//! attempt. Attempts are bounded by [`CLEANUP_RETRY`]; when they run out a
//! forced basic cleanup is performed and the driver stops.

use crate::page::{Markers, PageContext, DATE_ATTRIBUTE};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper, CLEANUP_RETRY};
use crate::time_source::{same_source, SharedTimeSource};
use crate::verify::{verify, VerificationReport};

/// How the original time source was put back during an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restoration {
    /// The page's reversal marker was invoked
    Hook,
    /// The original-reference marker was written back directly
    OriginalMarker,
    /// Nothing to restore from, or the host refused the write
    None,
}

/// Result of a [`CleanupDriver::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Another cleanup held the page; nothing was done
    pub skipped: bool,
    pub attempts: u32,
    pub verified: bool,
    /// The basic cleanup ran after the last failed attempt
    pub forced: bool,
    /// Issues from the last verification
    pub issues: Vec<String>,
}

impl CleanupOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            attempts: 0,
            verified: false,
            forced: false,
            issues: Vec::new(),
        }
    }
}

/// Drives cleanup attempts against one page at a time.
#[derive(Debug, Clone)]
pub struct CleanupDriver<S: Sleeper = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
}

impl Default for CleanupDriver<ThreadSleeper> {
    fn default() -> Self {
        Self::new(ThreadSleeper)
    }
}

impl<S: Sleeper> CleanupDriver<S> {
    pub fn new(sleeper: S) -> Self {
        Self::with_policy(CLEANUP_RETRY, sleeper)
    }

    pub fn with_policy(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper }
    }

    /// Clean the page. Concurrent runs against the same page collapse: a run
    /// that finds the cleanup marker held returns a skipped outcome.
    pub fn run(&self, page: &mut PageContext) -> CleanupOutcome {
        if !page.begin_cleanup() {
            log::debug!("cleanup already in progress on '{}'", page.hostname());
            return CleanupOutcome::skipped();
        }

        let attempted = self.policy.run(&self.sleeper, |attempt| {
            let report = cleanup_attempt(page);
            if report.success {
                Ok(())
            } else {
                log::debug!(
                    "cleanup attempt {} on '{}' left {} issue(s)",
                    attempt + 1,
                    page.hostname(),
                    report.issues.len()
                );
                Err(report.issues)
            }
        });

        let outcome = match attempted.result {
            Ok(()) => CleanupOutcome {
                skipped: false,
                attempts: attempted.attempts,
                verified: true,
                forced: false,
                issues: Vec::new(),
            },
            Err(issues) => {
                log::warn!(
                    "cleanup on '{}' failed after {} attempts, forcing basic cleanup: {}",
                    page.hostname(),
                    attempted.attempts,
                    issues.join("; ")
                );
                basic_cleanup(page);
                CleanupOutcome {
                    skipped: false,
                    attempts: attempted.attempts,
                    verified: false,
                    forced: true,
                    issues,
                }
            }
        };

        page.end_cleanup();
        outcome
    }
}

/// One full cleanup pass followed by verification.
///
/// Markers referencing the original time source are only removed once it is
/// back in place; while they remain, verification fails and the attempt is
/// retried.
fn cleanup_attempt(page: &mut PageContext) -> VerificationReport {
    let restoration = restore_original(page);
    log::debug!("restoration on '{}': {:?}", page.hostname(), restoration);

    page.remove_attribute(DATE_ATTRIBUTE);
    if restoration == Restoration::None && holds_original(page) {
        log::debug!("keeping override markers on '{}' until the time source is restored", page.hostname());
    } else {
        page.delete_markers(Markers::OVERRIDE);
    }

    verify(page)
}

/// Whether the page still holds a way back to its original time source.
fn holds_original(page: &PageContext) -> bool {
    page.present_markers().intersects(Markers::ORIGINAL | Markers::RESTORE)
}

/// Put the original time source back, preferring the page's own reversal
/// entry point.
pub fn restore_original(page: &mut PageContext) -> Restoration {
    if page.invoke_restore_hook() {
        return Restoration::Hook;
    }

    let Some(original) = page.original_marker() else {
        return Restoration::None;
    };

    match page.replace_time_source(original) {
        Ok(()) => Restoration::OriginalMarker,
        Err(err) => {
            log::warn!("manual restoration on '{}' failed: {}", page.hostname(), err);
            Restoration::None
        }
    }
}

/// Last-resort cleanup: plain assignment of the original, then marker and
/// attribute removal. Refused writes are ignored, but if the original could
/// not be put back the markers referencing it are left on the page.
pub fn basic_cleanup(page: &mut PageContext) {
    let restored = match page.original_marker() {
        Some(original) => {
            page.assign_time_source(SharedTimeSource::clone(&original));
            same_source(&page.time_source(), &original)
        }
        None => false,
    };

    if !restored && holds_original(page) {
        log::warn!("time source on '{}' could not be restored, keeping override markers", page.hostname());
    } else {
        page.delete_markers(Markers::OVERRIDE);
    }
    page.remove_attribute(DATE_ATTRIBUTE);
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::retry::NoopSleeper;
    use crate::spoof::{OverrideState, TimeSourceOverride};
    use crate::testing::CrippledTimeSource;
    use crate::time_source::{same_source, Capabilities, SharedTimeSource, SystemTimeSource};

    const NOW: i64 = 1_749_565_425_678;

    struct CountingSleeper {
        calls: Cell<u32>,
        total: Cell<Duration>,
    }

    impl CountingSleeper {
        fn new() -> Self {
            Self {
                calls: Cell::new(0),
                total: Cell::new(Duration::ZERO),
            }
        }
    }

    impl Sleeper for CountingSleeper {
        fn sleep(&self, duration: Duration) {
            self.calls.set(self.calls.get() + 1);
            self.total.set(self.total.get() + duration);
        }
    }

    fn page() -> PageContext {
        let source: SharedTimeSource = Arc::new(SystemTimeSource::with_clock(Utc, ManualClock::new(NOW)));
        PageContext::new("example.com", source)
    }

    #[test]
    fn test_cleanup_uses_restore_hook() {
        let mut page = page();
        let native = page.time_source();
        let ov = TimeSourceOverride::new();
        ov.install(&mut page, Some("2026-03-15")).expect("install");

        let outcome = CleanupDriver::new(NoopSleeper).run(&mut page);
        assert!(outcome.verified);
        assert!(!outcome.forced);
        assert_eq!(outcome.attempts, 1);
        assert!(same_source(&page.time_source(), &native));
        assert_eq!(ov.state(), OverrideState::Reversed);
        assert!(page.present_markers().is_empty());
    }

    #[test]
    fn test_cleanup_falls_back_to_original_marker() {
        let mut page = page();
        let native = page.time_source();
        let ov = TimeSourceOverride::new();
        ov.install(&mut page, None).expect("install");
        // Page script wiped the reversal marker but left the original.
        page.delete_markers(Markers::RESTORE);

        assert_eq!(restore_original(&mut page), Restoration::OriginalMarker);
        assert!(same_source(&page.time_source(), &native));
    }

    #[test]
    fn test_cleanup_on_clean_page_is_a_single_attempt() {
        let mut page = page();
        let sleeper = CountingSleeper::new();
        let outcome = CleanupDriver::new(sleeper).run(&mut page);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.verified);
    }

    #[test]
    fn test_cleanup_removes_leftover_attribute() {
        let mut page = page();
        page.set_attribute(DATE_ATTRIBUTE, "2026-03-15");
        let outcome = CleanupDriver::new(NoopSleeper).run(&mut page);
        assert!(outcome.verified);
        assert!(!page.has_attribute(DATE_ATTRIBUTE));
    }

    #[test]
    fn test_persistent_failure_is_bounded_and_forced() {
        let mut page = page();
        let broken: SharedTimeSource = Arc::new(CrippledTimeSource::new(Capabilities::CONSTRUCT | Capabilities::NOW));
        page.replace_time_source(broken).expect("replace");
        page.set_attribute(DATE_ATTRIBUTE, "2026-03-15");

        let driver = CleanupDriver::new(CountingSleeper::new());
        let outcome = driver.run(&mut page);

        assert!(!outcome.verified);
        assert!(outcome.forced);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(driver.sleeper.calls.get(), 2);
        assert_eq!(driver.sleeper.total.get(), Duration::from_millis(200));
        assert_eq!(
            outcome.issues,
            vec!["time source parse() is missing", "time source UTC() is missing"]
        );
        assert!(!page.has_markers(Markers::CLEANUP));
    }

    #[test]
    fn test_concurrent_cleanup_is_skipped() {
        let mut page = page();
        assert!(page.begin_cleanup());
        let outcome = CleanupDriver::new(NoopSleeper).run(&mut page);
        assert!(outcome.skipped);
        assert_eq!(outcome.attempts, 0);
        // The holder's marker is left alone.
        assert!(page.has_markers(Markers::CLEANUP));
    }

    #[test]
    fn test_basic_cleanup_keeps_references_on_locked_host() {
        let mut page = page();
        let native = page.time_source();
        let ov = TimeSourceOverride::new();
        ov.install(&mut page, None).expect("install");
        let spoofed = page.time_source();
        page.lock_time_source(true);

        basic_cleanup(&mut page);
        assert!(same_source(&page.time_source(), &spoofed));
        assert!(same_source(&page.original_marker().expect("marker"), &native));
        assert!(page.has_markers(Markers::RESTORE));
    }

    #[test]
    fn test_basic_cleanup_without_references() {
        let mut page = page();
        page.set_installed_marker();
        page.set_attribute(DATE_ATTRIBUTE, "2026-03-15");
        page.lock_time_source(true);

        basic_cleanup(&mut page);
        assert!(page.present_markers().is_empty());
        assert!(!page.has_attribute(DATE_ATTRIBUTE));
    }

    #[test]
    fn test_locked_host_fails_cleanup_and_keeps_original() {
        let mut page = page();
        let native = page.time_source();
        let ov = TimeSourceOverride::new();
        ov.install(&mut page, Some("2026-03-15")).expect("install");
        let spoofed = page.time_source();
        page.lock_time_source(true);

        let outcome = CleanupDriver::new(NoopSleeper).run(&mut page);
        assert!(!outcome.verified);
        assert!(outcome.forced);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(
            outcome.issues,
            vec![
                "__ORIGINAL_DATE__ still exists",
                "__RESTORE_DATE__ still exists",
                "__TIME_SPOOFER_INJECTED__ still exists",
            ]
        );
        assert_eq!(restore_original(&mut page), Restoration::None);
        assert_eq!(ov.state(), OverrideState::Installed);
        assert!(same_source(&page.time_source(), &spoofed));
        assert!(same_source(&page.original_marker().expect("marker"), &native));
        assert!(!page.has_markers(Markers::CLEANUP));

        // A later run succeeds once the host gives way
        page.lock_time_source(false);
        let outcome = CleanupDriver::new(NoopSleeper).run(&mut page);
        assert!(outcome.verified);
        assert!(same_source(&page.time_source(), &native));
        assert_eq!(ov.state(), OverrideState::Reversed);
    }
}
