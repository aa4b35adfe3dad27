//! Page context
//!
//! One page's global state as far as the override is concerned: the current
//! time source, the bridge markers the override publishes, and the document
//! attributes used to hand the requested date to the page.
//!
//! The host may refuse some writes. A locked time source cannot be redefined
//! and sealed markers cannot be deleted, only overwritten with
//! [`Slot::Undefined`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::spoof::TimeSourceOverride;
use crate::time_source::SharedTimeSource;

// =============================================================================
// Bridge Names
// =============================================================================

/// Marker holding the original time source.
pub const ORIGINAL_MARKER: &str = "__ORIGINAL_DATE__";
/// Marker holding the reversal entry point.
pub const RESTORE_MARKER: &str = "__RESTORE_DATE__";
/// Marker announcing an installed override.
pub const INSTALLED_MARKER: &str = "__TIME_SPOOFER_INJECTED__";
/// Marker set while a cleanup run is in progress.
pub const CLEANUP_MARKER: &str = "__CLEANUP_IN_PROGRESS__";
/// Document attribute carrying the requested date into the page.
pub const DATE_ATTRIBUTE: &str = "data-spoof-date";

bitflags::bitflags! {
    /// Set of page-global markers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Markers: u8 {
        const ORIGINAL = 1 << 0;
        const RESTORE = 1 << 1;
        const INSTALLED = 1 << 2;
        const CLEANUP = 1 << 3;
        /// Everything the override publishes
        const OVERRIDE = Self::ORIGINAL.bits() | Self::RESTORE.bits() | Self::INSTALLED.bits();
    }
}

impl Markers {
    /// Global name of a single marker.
    pub fn name(self) -> &'static str {
        if self == Self::ORIGINAL {
            ORIGINAL_MARKER
        } else if self == Self::RESTORE {
            RESTORE_MARKER
        } else if self == Self::INSTALLED {
            INSTALLED_MARKER
        } else if self == Self::CLEANUP {
            CLEANUP_MARKER
        } else {
            "<marker set>"
        }
    }
}

/// A page-global property slot.
#[derive(Debug, Clone, Default)]
pub enum Slot<T> {
    #[default]
    Absent,
    /// Present but overwritten with `undefined`
    Undefined,
    Present(T),
}

impl<T> Slot<T> {
    /// Whether the slot holds a live value.
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Present(value) => Some(value),
            _ => None,
        }
    }
}

/// The host refused a write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("host refused to redefine the page time source")]
    TimeSourceLocked,
}

// =============================================================================
// Page Context
// =============================================================================

/// Identity of one page context. Unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(u64);

impl PageId {
    fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Global state of one page.
#[derive(Debug)]
pub struct PageContext {
    id: PageId,
    hostname: String,
    time_source: SharedTimeSource,
    time_source_locked: bool,
    sealed: Markers,
    original: Slot<SharedTimeSource>,
    restore: Slot<TimeSourceOverride>,
    installed: Slot<()>,
    cleanup: Slot<()>,
    attributes: BTreeMap<String, String>,
}

impl PageContext {
    pub fn new(hostname: &str, time_source: SharedTimeSource) -> Self {
        Self {
            id: PageId::fresh(),
            hostname: hostname.to_ascii_lowercase(),
            time_source,
            time_source_locked: false,
            sealed: Markers::empty(),
            original: Slot::Absent,
            restore: Slot::Absent,
            installed: Slot::Absent,
            cleanup: Slot::Absent,
            attributes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    // -------------------------------------------------------------------------
    // Host behavior
    // -------------------------------------------------------------------------

    /// Make the host refuse (or allow) redefinition of the time source.
    pub fn lock_time_source(&mut self, locked: bool) {
        self.time_source_locked = locked;
    }

    /// Make the host refuse deletion of the given markers.
    pub fn seal_markers(&mut self, markers: Markers) {
        self.sealed |= markers;
    }

    // -------------------------------------------------------------------------
    // Time source
    // -------------------------------------------------------------------------

    /// The page's current time source.
    pub fn time_source(&self) -> SharedTimeSource {
        SharedTimeSource::clone(&self.time_source)
    }

    /// Redefine the page time source.
    pub fn replace_time_source(&mut self, source: SharedTimeSource) -> Result<(), PageError> {
        if self.time_source_locked {
            return Err(PageError::TimeSourceLocked);
        }
        self.time_source = source;
        Ok(())
    }

    /// Plain assignment; a refused write is silently ignored.
    pub fn assign_time_source(&mut self, source: SharedTimeSource) {
        if self.replace_time_source(source).is_err() {
            log::debug!("time source assignment ignored by host");
        }
    }

    // -------------------------------------------------------------------------
    // Markers
    // -------------------------------------------------------------------------

    /// Markers currently holding a live value.
    pub fn present_markers(&self) -> Markers {
        let mut present = Markers::empty();
        present.set(Markers::ORIGINAL, self.original.is_present());
        present.set(Markers::RESTORE, self.restore.is_present());
        present.set(Markers::INSTALLED, self.installed.is_present());
        present.set(Markers::CLEANUP, self.cleanup.is_present());
        present
    }

    /// Whether every marker in `markers` holds a live value.
    pub fn has_markers(&self, markers: Markers) -> bool {
        self.present_markers().contains(markers)
    }

    pub fn set_installed_marker(&mut self) {
        self.installed = Slot::Present(());
    }

    pub fn publish_original(&mut self, source: SharedTimeSource) {
        self.original = Slot::Present(source);
    }

    pub fn original_marker(&self) -> Option<SharedTimeSource> {
        self.original.value().cloned()
    }

    pub fn publish_restore_hook(&mut self, hook: TimeSourceOverride) {
        self.restore = Slot::Present(hook);
    }

    pub fn restore_hook(&self) -> Option<TimeSourceOverride> {
        self.restore.value().cloned()
    }

    /// Call the published reversal entry point. Returns false if none exists
    /// or the reversal did not complete.
    pub fn invoke_restore_hook(&mut self) -> bool {
        match self.restore_hook() {
            Some(hook) => hook.reverse(self),
            None => false,
        }
    }

    /// Delete markers, overwriting sealed ones with `undefined`.
    pub fn delete_markers(&mut self, markers: Markers) {
        for marker in markers.iter() {
            let sealed = self.sealed.contains(marker);
            if sealed {
                log::debug!("cannot delete {}, setting to undefined", marker.name());
            }

            if marker == Markers::ORIGINAL {
                self.original = if sealed { Slot::Undefined } else { Slot::Absent };
            } else if marker == Markers::RESTORE {
                self.restore = if sealed { Slot::Undefined } else { Slot::Absent };
            } else if marker == Markers::INSTALLED {
                self.installed = if sealed { Slot::Undefined } else { Slot::Absent };
            } else if marker == Markers::CLEANUP {
                self.cleanup = if sealed { Slot::Undefined } else { Slot::Absent };
            }
        }
    }

    /// Claim the cleanup marker. Returns false if a cleanup already holds it.
    pub fn begin_cleanup(&mut self) -> bool {
        if self.cleanup.is_present() {
            return false;
        }
        self.cleanup = Slot::Present(());
        true
    }

    pub fn end_cleanup(&mut self) {
        self.delete_markers(Markers::CLEANUP);
    }

    // -------------------------------------------------------------------------
    // Document attributes
    // -------------------------------------------------------------------------

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::time_source::{same_source, SystemTimeSource};

    fn page() -> PageContext {
        let source: SharedTimeSource = Arc::new(SystemTimeSource::with_clock(Utc, ManualClock::new(0)));
        PageContext::new("Example.COM", source)
    }

    #[test]
    fn test_hostname_is_lowercased() {
        assert_eq!(page().hostname(), "example.com");
    }

    #[test]
    fn test_page_ids_are_unique() {
        let (a, b) = (page(), page());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.id());
    }

    #[test]
    fn test_locked_time_source_refuses_replacement() {
        let mut page = page();
        let before = page.time_source();
        let other: SharedTimeSource = Arc::new(SystemTimeSource::with_clock(Utc, ManualClock::new(1)));

        page.lock_time_source(true);
        assert_eq!(page.replace_time_source(Arc::clone(&other)), Err(PageError::TimeSourceLocked));
        page.assign_time_source(Arc::clone(&other));
        assert!(same_source(&page.time_source(), &before));

        page.lock_time_source(false);
        assert!(page.replace_time_source(Arc::clone(&other)).is_ok());
        assert!(same_source(&page.time_source(), &other));
    }

    #[test]
    fn test_delete_markers_respects_seal() {
        let mut page = page();
        let source = page.time_source();
        page.set_installed_marker();
        page.publish_original(source);
        page.seal_markers(Markers::INSTALLED);

        page.delete_markers(Markers::OVERRIDE);
        assert!(page.present_markers().is_empty());
        assert!(matches!(page.installed, Slot::Undefined));
        assert!(matches!(page.original, Slot::Absent));
    }

    #[test]
    fn test_cleanup_marker_is_exclusive() {
        let mut page = page();
        assert!(page.begin_cleanup());
        assert!(!page.begin_cleanup());
        page.end_cleanup();
        assert!(page.begin_cleanup());
    }

    #[test]
    fn test_attributes() {
        let mut page = page();
        page.set_attribute(DATE_ATTRIBUTE, "2026-03-15");
        assert_eq!(page.attribute(DATE_ATTRIBUTE), Some("2026-03-15"));
        assert!(page.remove_attribute(DATE_ATTRIBUTE));
        assert!(!page.has_attribute(DATE_ATTRIBUTE));
        assert!(!page.remove_attribute(DATE_ATTRIBUTE));
    }

    #[test]
    fn test_marker_names() {
        assert_eq!(Markers::ORIGINAL.name(), ORIGINAL_MARKER);
        assert_eq!(Markers::RESTORE.name(), RESTORE_MARKER);
        assert_eq!(Markers::INSTALLED.name(), INSTALLED_MARKER);
        assert_eq!(Markers::CLEANUP.name(), CLEANUP_MARKER);
    }

    #[test]
    fn test_invoke_restore_hook_without_hook() {
        let mut page = page();
        assert!(!page.invoke_restore_hook());
    }
}
