//! Persisted settings
//!
//! The settings document lives in the browser's synced key/value storage
//! under five stable keys. Reads are lenient: missing or mistyped values fall
//! back to defaults, and store failures look like an empty document.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Storage keys.
pub mod keys {
    pub const SPOOF_ENABLED: &str = "spoofEnabled";
    pub const QUICK_SPOOF_ENABLED: &str = "quickSpoofEnabled";
    pub const SPOOF_DATE: &str = "spoofDate";
    pub const WHITELIST_ENABLED: &str = "whitelistEnabled";
    pub const WHITELIST_DOMAINS: &str = "whitelistDomains";

    pub const ALL: [&str; 5] = [
        SPOOF_ENABLED,
        QUICK_SPOOF_ENABLED,
        SPOOF_DATE,
        WHITELIST_ENABLED,
        WHITELIST_DOMAINS,
    ];
}

/// Whitelist text stored when none has been saved yet.
pub const DEFAULT_WHITELIST: &str = "";

/// Longest whitelist text accepted from the editor, in characters.
pub const MAX_WHITELIST_INPUT_CHARS: usize = 10_000;

/// Most lines kept from the editor.
pub const MAX_WHITELIST_INPUT_LINES: usize = 100;

/// Raw key/value document as the store hands it out.
pub type SettingsMap = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// User settings.
///
/// Serializes as the storage document, through [`SpoofSettings::to_map`] and
/// [`SpoofSettings::from_map`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpoofSettings {
    pub enabled: bool,
    pub quick_enabled: bool,
    pub target_date: Option<String>,
    pub whitelist_enabled: bool,
    pub whitelist: String,
}

impl SpoofSettings {
    /// Either spoofing mode is on.
    pub fn is_active(&self) -> bool {
        self.enabled || self.quick_enabled
    }

    /// Read settings from a raw document. Flags use truthiness, text fields
    /// must be strings; anything else falls back to the default.
    pub fn from_map(map: &SettingsMap) -> Self {
        let flag = |key: &str| map.get(key).is_some_and(truthy);
        let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

        Self {
            enabled: flag(keys::SPOOF_ENABLED),
            quick_enabled: flag(keys::QUICK_SPOOF_ENABLED),
            target_date: text(keys::SPOOF_DATE).filter(|date| !date.is_empty()),
            whitelist_enabled: flag(keys::WHITELIST_ENABLED),
            whitelist: text(keys::WHITELIST_DOMAINS).unwrap_or_default(),
        }
    }

    /// Write every field back under its storage key. An unset date is omitted.
    pub fn to_map(&self) -> SettingsMap {
        let mut map = SettingsMap::new();
        map.insert(keys::SPOOF_ENABLED.into(), Value::Bool(self.enabled));
        map.insert(keys::QUICK_SPOOF_ENABLED.into(), Value::Bool(self.quick_enabled));
        if let Some(date) = &self.target_date {
            map.insert(keys::SPOOF_DATE.into(), Value::String(date.clone()));
        }
        map.insert(keys::WHITELIST_ENABLED.into(), Value::Bool(self.whitelist_enabled));
        map.insert(keys::WHITELIST_DOMAINS.into(), Value::String(self.whitelist.clone()));
        map
    }

    /// Parse a settings document with the same leniency as [`Self::from_map`].
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Serialize for SpoofSettings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SpoofSettings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => Ok(Self::from_map(&map)),
            _ => Err(de::Error::custom("settings document must be a JSON object")),
        }
    }
}

/// Clean whitelist editor text before it is stored.
///
/// Markup characters (`<>'"&`) are dropped and every whitespace run becomes a
/// single line break. The result is then cut to
/// [`MAX_WHITELIST_INPUT_CHARS`] characters and [`MAX_WHITELIST_INPUT_LINES`]
/// lines. Entries are not validated here; that happens at match time.
pub fn sanitize_whitelist_input(input: &str) -> String {
    let mut normalized = String::with_capacity(input.len());
    let mut in_whitespace = false;

    for c in input.chars().filter(|c| !matches!(*c, '<' | '>' | '\'' | '"' | '&')) {
        if c.is_whitespace() {
            if !in_whitespace {
                normalized.push('\n');
            }
            in_whitespace = true;
        } else {
            normalized.push(c);
            in_whitespace = false;
        }
    }

    let capped: String = normalized.chars().take(MAX_WHITELIST_INPUT_CHARS).collect();
    capped
        .split('\n')
        .take(MAX_WHITELIST_INPUT_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

/// JavaScript truthiness of a stored value.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// =============================================================================
// Store
// =============================================================================

/// Key/value settings storage. Failures are reported as values, never
/// raised: a failed read is an empty document, a failed write is `false`.
pub trait SettingsStore {
    fn get(&self, keys: &[&str]) -> SettingsMap;
    fn set(&self, items: SettingsMap) -> bool;
    fn clear(&self) -> bool;
}

impl<T: SettingsStore + ?Sized> SettingsStore for &T {
    fn get(&self, keys: &[&str]) -> SettingsMap {
        (**self).get(keys)
    }

    fn set(&self, items: SettingsMap) -> bool {
        (**self).set(items)
    }

    fn clear(&self) -> bool {
        (**self).clear()
    }
}

/// In-process store with failure injection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<SettingsMap>,
    failing_sets: AtomicU32,
    failing_reads: AtomicBool,
    failing_clear: AtomicBool,
    set_calls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: &SpoofSettings) -> Self {
        let store = Self::new();
        *store.data() = settings.to_map();
        store
    }

    fn data(&self) -> MutexGuard<'_, SettingsMap> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_sets(&self, count: u32) {
        self.failing_sets.store(count, Ordering::Relaxed);
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::Relaxed);
    }

    pub fn fail_clear(&self, failing: bool) {
        self.failing_clear.store(failing, Ordering::Relaxed);
    }

    /// Number of `set` calls so far, failed ones included.
    pub fn set_calls(&self) -> u32 {
        self.set_calls.load(Ordering::Relaxed)
    }

    /// Copy of the stored document.
    pub fn snapshot(&self) -> SettingsMap {
        self.data().clone()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> SettingsMap {
        if self.failing_reads.load(Ordering::Relaxed) {
            return SettingsMap::new();
        }
        let data = self.data();
        keys.iter()
            .filter_map(|key| data.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect()
    }

    fn set(&self, items: SettingsMap) -> bool {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        let failing = self
            .failing_sets
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return false;
        }
        self.data().extend(items);
        true
    }

    fn clear(&self) -> bool {
        if self.failing_clear.load(Ordering::Relaxed) {
            return false;
        }
        self.data().clear();
        true
    }
}
