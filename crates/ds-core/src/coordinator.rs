//! Settings coordinator
//!
//! Background-side handling of the popup's toggles and edits: persist the
//! new state with retries, keep the two spoofing modes mutually exclusive and
//! report which tabs need attention. Tab operations themselves are left to
//! the caller.

use serde_json::Value;

use crate::decision::should_reload;
use crate::domain;
use crate::retry::{Attempted, RetryPolicy, Sleeper, ThreadSleeper, SETTINGS_RETRY};
use crate::settings::{
    keys, sanitize_whitelist_input, truthy, SettingsMap, SettingsStore, SpoofSettings, DEFAULT_WHITELIST,
};
use crate::time_source::{tomorrow_iso, SharedTimeSource};

/// How often the matcher caches are dropped while the worker is alive.
pub const CACHE_CLEAR_INTERVAL_MS: i64 = 600_000;

/// Which toggle changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoofMode {
    /// Spoof to a user-chosen date
    Full,
    /// Spoof to tomorrow
    Quick,
}

impl SpoofMode {
    fn key(self) -> &'static str {
        match self {
            Self::Full => keys::SPOOF_ENABLED,
            Self::Quick => keys::QUICK_SPOOF_ENABLED,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Full => Self::Quick,
            Self::Quick => Self::Full,
        }
    }
}

/// What a toggle did and what the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub saved: bool,
    pub attempts: u32,
    /// Date written along with the flag, if any
    pub date: Option<String>,
    /// Spoofing was switched off: run the cleanup script on every tab
    pub cleanup_tabs: bool,
    /// Reload the current tab if [`Coordinator::should_reload_current`] agrees
    pub reload_current: bool,
}

/// What a date or whitelist edit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOutcome {
    pub saved: bool,
    pub attempts: u32,
    /// The edit affects live spoofing: call [`Coordinator::refresh`] for the
    /// current tab
    pub refresh: bool,
}

/// What a suspend did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendOutcome {
    pub store_cleared: bool,
    pub cleanup_tabs: bool,
}

/// Persists toggles against a [`SettingsStore`].
#[derive(Debug)]
pub struct Coordinator<S: SettingsStore, Z: Sleeper = ThreadSleeper> {
    store: S,
    time_source: SharedTimeSource,
    sleeper: Z,
    policy: RetryPolicy,
    last_cache_clear: Option<i64>,
}

impl<S: SettingsStore> Coordinator<S, ThreadSleeper> {
    pub fn new(store: S, time_source: SharedTimeSource) -> Self {
        Self::with_sleeper(store, time_source, ThreadSleeper)
    }
}

impl<S: SettingsStore, Z: Sleeper> Coordinator<S, Z> {
    pub fn with_sleeper(store: S, time_source: SharedTimeSource, sleeper: Z) -> Self {
        Self {
            store,
            time_source,
            sleeper,
            policy: SETTINGS_RETRY,
            last_cache_clear: None,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current settings; defaults for anything missing or unreadable.
    pub fn load_settings(&self) -> SpoofSettings {
        SpoofSettings::from_map(&self.store.get(&keys::ALL))
    }

    /// Switch a spoofing mode on or off.
    ///
    /// Enabling a mode writes the other mode's flag as `false`. Enabling quick
    /// mode stores tomorrow's date unless `date` is given. Exhausted retries
    /// are reported through [`ToggleOutcome::saved`].
    pub fn toggle(&mut self, mode: SpoofMode, enabled: bool, date: Option<&str>) -> ToggleOutcome {
        let date = match (mode, enabled, date) {
            (_, _, Some(date)) if !date.is_empty() => Some(date.to_string()),
            (SpoofMode::Quick, true, _) => Some(tomorrow_iso(self.time_source.as_ref())),
            _ => None,
        };

        let mut items = SettingsMap::new();
        items.insert(mode.key().into(), Value::Bool(enabled));
        if enabled {
            items.insert(mode.other().key().into(), Value::Bool(false));
        }
        if let Some(date) = &date {
            items.insert(keys::SPOOF_DATE.into(), Value::String(date.clone()));
        }

        let attempted = self.save(&items);
        let saved = attempted.result.is_ok();

        if saved {
            log::debug!("{:?} spoofing set to {} after {} attempt(s)", mode, enabled, attempted.attempts);
        } else {
            log::warn!("saving {:?} spoofing state failed after {} attempts", mode, attempted.attempts);
        }

        ToggleOutcome {
            saved,
            attempts: attempted.attempts,
            date,
            cleanup_tabs: saved && !enabled,
            reload_current: saved,
        }
    }

    /// Store a new target date. Spoofing that is already on picks it up after
    /// a refresh.
    pub fn set_date(&mut self, date: &str) -> EditOutcome {
        let mut items = SettingsMap::new();
        items.insert(keys::SPOOF_DATE.into(), Value::String(date.to_string()));
        self.edit("date", &items, SpoofSettings::is_active)
    }

    /// Switch whitelist filtering on or off.
    pub fn set_whitelist_enabled(&mut self, enabled: bool) -> EditOutcome {
        let mut items = SettingsMap::new();
        items.insert(keys::WHITELIST_ENABLED.into(), Value::Bool(enabled));
        self.edit("whitelist toggle", &items, SpoofSettings::is_active)
    }

    /// Sanitize and store whitelist editor text. A refresh is only requested
    /// while the whitelist is in effect.
    pub fn save_whitelist(&mut self, raw: &str) -> EditOutcome {
        let mut items = SettingsMap::new();
        items.insert(keys::WHITELIST_DOMAINS.into(), Value::String(sanitize_whitelist_input(raw)));
        self.edit("whitelist", &items, |settings| settings.is_active() && settings.whitelist_enabled)
    }

    /// Fill in a target date (tomorrow) and the default whitelist when they
    /// have never been stored. Returns whether anything was written.
    pub fn save_defaults_if_needed(&mut self) -> bool {
        let doc = self.store.get(&[keys::SPOOF_DATE, keys::WHITELIST_DOMAINS]);

        let mut items = SettingsMap::new();
        if !doc.get(keys::SPOOF_DATE).is_some_and(truthy) {
            items.insert(keys::SPOOF_DATE.into(), Value::String(tomorrow_iso(self.time_source.as_ref())));
        }
        if !doc.contains_key(keys::WHITELIST_DOMAINS) {
            items.insert(keys::WHITELIST_DOMAINS.into(), Value::String(DEFAULT_WHITELIST.to_string()));
        }
        if items.is_empty() {
            return false;
        }

        let saved = self.save(&items).result.is_ok();
        if !saved {
            log::warn!("saving default settings failed");
        }
        saved
    }

    /// Apply a date or whitelist change to the current tab: whether it
    /// should be reloaded.
    pub fn refresh(&self, tab_url: &str) -> bool {
        let reload = self.should_reload_current(tab_url);
        log::debug!("refresh of '{}': reload {}", tab_url, reload);
        reload
    }

    /// Whether the current tab should be reloaded under the stored whitelist.
    pub fn should_reload_current(&self, tab_url: &str) -> bool {
        let doc = self.store.get(&[keys::WHITELIST_ENABLED, keys::WHITELIST_DOMAINS]);
        let settings = SpoofSettings::from_map(&doc);
        should_reload(tab_url, settings.whitelist_enabled, &settings.whitelist)
    }

    fn save(&self, items: &SettingsMap) -> Attempted<(), ()> {
        let store = &self.store;
        self.policy.run(&self.sleeper, |_| {
            if store.set(items.clone()) {
                Ok(())
            } else {
                Err(())
            }
        })
    }

    fn edit(
        &self,
        what: &str,
        items: &SettingsMap,
        wants_refresh: impl FnOnce(&SpoofSettings) -> bool,
    ) -> EditOutcome {
        let attempted = self.save(items);
        let saved = attempted.result.is_ok();
        if saved {
            log::debug!("{} saved after {} attempt(s)", what, attempted.attempts);
        } else {
            log::warn!("saving {} failed after {} attempts", what, attempted.attempts);
        }

        EditOutcome {
            saved,
            attempts: attempted.attempts,
            refresh: saved && wants_refresh(&self.load_settings()),
        }
    }

    /// Drop the matcher caches if the interval has elapsed. Returns whether
    /// they were dropped.
    pub fn tick(&mut self, now_ms: i64) -> bool {
        match self.last_cache_clear {
            None => {
                self.last_cache_clear = Some(now_ms);
                false
            }
            Some(last) if now_ms - last >= CACHE_CLEAR_INTERVAL_MS => {
                domain::clear_caches();
                self.last_cache_clear = Some(now_ms);
                log::debug!("matcher caches cleared");
                true
            }
            Some(_) => false,
        }
    }

    /// The worker is going away: wipe stored settings and caches. Every tab
    /// needs cleaning afterwards.
    pub fn suspend(&mut self) -> SuspendOutcome {
        let store_cleared = self.store.clear();
        if !store_cleared {
            log::warn!("clearing settings store on suspend failed");
        }
        domain::clear_caches();
        self.last_cache_clear = None;

        SuspendOutcome {
            store_cleared,
            cleanup_tabs: true,
        }
    }
}
