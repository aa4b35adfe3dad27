//! DateSpoof Core Library
//!
//! This crate provides the decision and override engine for the DateSpoof
//! browser extension, which makes web pages observe a chosen calendar date.
//!
//! # Architecture
//!
//! A page is modeled as a [`PageContext`] holding its current time source and
//! the bridge markers the override publishes. [`TimeSourceOverride`] swaps the
//! page's time source for a [`SpoofedTimeSource`] and can put the original
//! back, either directly or from the page side through the reversal marker.
//! Whether a page gets the override at all is decided from the user's
//! [`SpoofSettings`] and the domain whitelist.
//!
//! # Modules
//!
//! - `domain`: Whitelist parsing and cached domain matching
//! - `decision`: Injection and reload decisions
//! - `time_source`: Time source trait, native and spoofed implementations
//! - `page`: Page-global state and bridge markers
//! - `spoof`: The override install/reverse state machine
//! - `verify`: Post-reversal verification
//! - `cleanup`: Bounded cleanup driver
//! - `settings`: Persisted settings and the store contract
//! - `coordinator`: Toggle and settings-edit persistence with retries
//! - `retry`: Retry policies and sleepers
//! - `clock`: Wall-clock abstraction
//! - `url`: Tab URL helpers
//! - `testing`: Test doubles for hostile host behavior

pub mod cleanup;
pub mod clock;
pub mod coordinator;
pub mod decision;
pub mod domain;
pub mod page;
pub mod retry;
pub mod settings;
pub mod spoof;
pub mod testing;
pub mod time_source;
pub mod url;
pub mod verify;

// Re-export commonly used types
pub use cleanup::{CleanupDriver, CleanupOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{Coordinator, EditOutcome, SpoofMode, ToggleOutcome};
pub use decision::{decide, injected_date, should_reload, stage_injection};
pub use domain::{clear_caches, get_base_domain, is_whitelisted, parse_whitelist, DomainMatcher, WhitelistEntries};
pub use page::{Markers, PageContext, PageError, PageId};
pub use settings::{sanitize_whitelist_input, MemoryStore, SettingsError, SettingsStore, SpoofSettings};
pub use spoof::{InstallOutcome, OverrideError, OverrideState, TimeSourceOverride};
pub use time_source::{
    compute_target_time, tomorrow_iso, DateInput, SharedTimeSource, SpoofedTimeSource, SystemTimeSource, TimeSource,
};
pub use verify::{verify, VerificationReport};
