//! Post-reversal verification
//!
//! Checks that a page no longer carries any trace of an override and that its
//! time source still looks like a real one. Structural only: the checks do
//! not compare values against the original source.

use crate::page::{Markers, PageContext, DATE_ATTRIBUTE};
use crate::time_source::Capabilities;

/// Outcome of [`verify`]. `issues` is in check order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub success: bool,
    pub issues: Vec<String>,
}

/// Inspect a page after a reversal attempt.
pub fn verify(page: &PageContext) -> VerificationReport {
    let mut issues = Vec::new();

    for marker in [Markers::ORIGINAL, Markers::RESTORE, Markers::INSTALLED] {
        if page.has_markers(marker) {
            issues.push(format!("{} still exists", marker.name()));
        }
    }

    if page.has_attribute(DATE_ATTRIBUTE) {
        issues.push(format!("{} attribute still exists", DATE_ATTRIBUTE));
    }

    let capabilities = page.time_source().capabilities();
    if !capabilities.contains(Capabilities::CONSTRUCT) {
        issues.push("time source is not callable".to_string());
    } else {
        if !capabilities.contains(Capabilities::NOW) {
            issues.push("time source now() is missing".to_string());
        }
        if !capabilities.contains(Capabilities::PARSE) {
            issues.push("time source parse() is missing".to_string());
        }
        if !capabilities.contains(Capabilities::UTC) {
            issues.push("time source UTC() is missing".to_string());
        }
    }

    VerificationReport {
        success: issues.is_empty(),
        issues,
    }
}
