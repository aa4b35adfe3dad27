use std::sync::Arc;

use chrono::{FixedOffset, Local, SecondsFormat, TimeZone, Utc};
use ds_core::cleanup::CleanupDriver;
use ds_core::decision::stage_injection;
use ds_core::page::{Markers, PageContext};
use ds_core::retry::NoopSleeper;
use ds_core::settings::SpoofSettings;
use ds_core::spoof::{InstallOutcome, TimeSourceOverride};
use ds_core::time_source::{same_source, SharedTimeSource, SystemTimeSource};
use ds_core::verify::verify;

pub struct SimulateOptions {
    pub settings: SpoofSettings,
    pub hostname: String,
    /// Fixed UTC offset for the page, in minutes east. Local time when unset.
    pub offset_minutes: Option<i32>,
    /// Host refuses to redefine the time source
    pub locked: bool,
    /// Host refuses to delete the override markers
    pub sealed: bool,
}

pub fn time_source(offset_minutes: Option<i32>) -> Result<SharedTimeSource, String> {
    match offset_minutes {
        Some(minutes) => {
            let offset = FixedOffset::east_opt(minutes * 60)
                .ok_or_else(|| format!("Invalid UTC offset: {} minutes", minutes))?;
            Ok(Arc::new(SystemTimeSource::new(offset)))
        }
        None => Ok(Arc::new(SystemTimeSource::new(Local))),
    }
}

pub fn format_ms(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => format!("<invalid {}>", epoch_ms),
    }
}

pub fn run_simulate(opts: SimulateOptions) -> Result<(), String> {
    let original = time_source(opts.offset_minutes)?;
    let mut page = PageContext::new(&opts.hostname, SharedTimeSource::clone(&original));
    page.lock_time_source(opts.locked);
    if opts.sealed {
        page.seal_markers(Markers::OVERRIDE);
    }

    println!("Page: {}", page.hostname());
    println!("  Real now:   {}", format_ms(original.now()));

    if !stage_injection(&mut page, &opts.settings) {
        println!("  Decision:   skip (spoofing off or host not whitelisted)");
        return Ok(());
    }
    println!("  Decision:   inject");

    let ov = TimeSourceOverride::new();
    match ov.install_from_attribute(&mut page) {
        Ok(InstallOutcome::Installed { target_ms }) => {
            println!("  Installed:  target {}", format_ms(target_ms));
        }
        Ok(InstallOutcome::AlreadyActive) => {
            println!("  Installed:  already active");
        }
        Err(e) => {
            println!("  Install failed: {}", e);
            println!("  Markers left: {:?}", page.present_markers());
            return Ok(());
        }
    }
    println!("  Page now:   {}", format_ms(page.time_source().now()));

    let outcome = CleanupDriver::new(NoopSleeper).run(&mut page);
    println!(
        "  Cleanup:    {} attempt(s), verified: {}, forced: {}",
        outcome.attempts, outcome.verified, outcome.forced
    );
    for issue in &outcome.issues {
        println!("    - {}", issue);
    }

    let report = verify(&page);
    println!("  Restored:   {}", same_source(&page.time_source(), &original));
    println!("  Verified:   {}", report.success);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_ms(1_749_565_425_678), "2025-06-10T14:23:45.678Z");
    }

    #[test]
    fn test_invalid_offset_is_rejected() {
        assert!(time_source(Some(24 * 60)).is_err());
        assert!(time_source(Some(-300)).is_ok());
    }
}
