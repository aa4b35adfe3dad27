//! Time-source override state machine
//!
//! `Uninstalled -> Installed -> Reversed`. An override replaces a page's time
//! source with a [`SpoofedTimeSource`] and publishes two bridge markers: the
//! original source and a reversal entry point. `Reversed` is terminal; a new
//! instance is needed to install again.
//!
//! The installed marker on the page is set before anything else, so a second
//! install attempt on the same page (from this or any other instance) backs
//! off instead of stacking overrides.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::page::{Markers, PageContext, PageError, PageId, DATE_ATTRIBUTE};
use crate::time_source::{compute_target_time, SharedTimeSource, SpoofedTimeSource};

/// Lifecycle of one override instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideState {
    Uninstalled,
    Installed,
    Reversed,
}

/// Result of an install attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The override is now active and reports `target_ms`.
    Installed { target_ms: i64 },
    /// An override was already active; nothing changed.
    AlreadyActive,
}

#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("override was already reversed; create a new instance to reinstall")]
    Terminal,
    #[error("install failed: {0}")]
    Page(#[from] PageError),
}

#[derive(Debug)]
struct Inner {
    state: OverrideState,
    /// Page the override was installed on
    page: Option<PageId>,
    original: Option<SharedTimeSource>,
    target_ms: Option<i64>,
}

/// Handle to an override. Clones share one state machine.
#[derive(Clone)]
pub struct TimeSourceOverride {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for TimeSourceOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("TimeSourceOverride")
            .field("state", &inner.state)
            .field("target_ms", &inner.target_ms)
            .finish()
    }
}

impl Default for TimeSourceOverride {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSourceOverride {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: OverrideState::Uninstalled,
                page: None,
                original: None,
                target_ms: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> OverrideState {
        self.lock().state
    }

    /// The instant reported while installed.
    pub fn target_time(&self) -> Option<i64> {
        self.lock().target_ms
    }

    /// Whether two handles share the same override.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Install using the date handed over in the page's date attribute.
    pub fn install_from_attribute(&self, page: &mut PageContext) -> Result<InstallOutcome, OverrideError> {
        let requested = page.attribute(DATE_ATTRIBUTE).map(str::to_string);
        self.install(page, requested.as_deref())
    }

    /// Replace the page's time source with one reporting `requested`
    /// (`YYYY-MM-DD`) at the current time of day, or tomorrow when the date
    /// is missing or invalid.
    ///
    /// On failure the page is left as it was before the call.
    pub fn install(
        &self,
        page: &mut PageContext,
        requested: Option<&str>,
    ) -> Result<InstallOutcome, OverrideError> {
        let mut inner = self.lock();

        match inner.state {
            OverrideState::Reversed => return Err(OverrideError::Terminal),
            OverrideState::Installed => return Ok(InstallOutcome::AlreadyActive),
            OverrideState::Uninstalled => {}
        }

        if page.has_markers(Markers::INSTALLED) {
            log::debug!("override already active on '{}'", page.hostname());
            return Ok(InstallOutcome::AlreadyActive);
        }
        page.set_installed_marker();

        let original = page.time_source();
        let target_ms = compute_target_time(requested, original.as_ref());
        let spoofed: SharedTimeSource =
            Arc::new(SpoofedTimeSource::new(SharedTimeSource::clone(&original), target_ms));

        if let Err(err) = page.replace_time_source(spoofed) {
            log::warn!("installing override on '{}' failed: {}", page.hostname(), err);
            Self::rollback(&mut inner, page);
            return Err(err.into());
        }

        page.publish_original(SharedTimeSource::clone(&original));
        page.publish_restore_hook(self.clone());
        page.remove_attribute(DATE_ATTRIBUTE);

        inner.page = Some(page.id());
        inner.original = Some(original);
        inner.target_ms = Some(target_ms);
        inner.state = OverrideState::Installed;

        log::debug!("override installed on '{}' at {}", page.hostname(), target_ms);
        Ok(InstallOutcome::Installed { target_ms })
    }

    /// Undo a failed install. The time source was never replaced.
    fn rollback(inner: &mut Inner, page: &mut PageContext) {
        page.delete_markers(Markers::OVERRIDE);
        inner.page = None;
        inner.original = None;
        inner.target_ms = None;
        inner.state = OverrideState::Reversed;
    }

    /// Restore the original time source and remove every published marker.
    ///
    /// Returns false (and does nothing) unless the override is installed on
    /// `page`. If the host refuses to restore the time source, the override
    /// stays installed with its markers in place and false is returned.
    pub fn reverse(&self, page: &mut PageContext) -> bool {
        let mut inner = self.lock();
        if inner.state != OverrideState::Installed {
            return false;
        }
        if inner.page != Some(page.id()) {
            log::warn!("override was installed on another page, not reversing on '{}'", page.hostname());
            return false;
        }

        if let Some(original) = &inner.original {
            if let Err(err) = page.replace_time_source(SharedTimeSource::clone(original)) {
                log::warn!("restoring time source on '{}' failed: {}", page.hostname(), err);
                return false;
            }
        }

        page.delete_markers(Markers::OVERRIDE);
        page.remove_attribute(DATE_ATTRIBUTE);

        inner.page = None;
        inner.original = None;
        inner.target_ms = None;
        inner.state = OverrideState::Reversed;

        log::debug!("override reversed on '{}'", page.hostname());
        true
    }
}
