//! Time sources
//!
//! A [`TimeSource`] is the page-global construct that reports the current
//! date: it can be asked for "now", construct date values from several input
//! shapes, parse date strings and build UTC instants from calendar fields.
//! [`SystemTimeSource`] is the native implementation; [`SpoofedTimeSource`]
//! wraps a native source and reports a fixed target instant instead of now.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::clock::{Clock, SystemClock};

/// Single numeric constructor arguments closer than this to the real now are
/// treated as "now" by the spoofed source.
pub const NOW_WINDOW_MS: u64 = 3_600_000;

const DAY_MS: i64 = 86_400_000;

/// Largest magnitude a date value may have (±100 000 000 days).
pub const MAX_TIME_MS: i64 = 8_640_000_000_000_000;

/// Whether `epoch_ms` lies within the representable date range.
pub fn in_time_range(epoch_ms: i64) -> bool {
    (-MAX_TIME_MS..=MAX_TIME_MS).contains(&epoch_ms)
}

/// Shared handle to a time source, as stored on a page.
pub type SharedTimeSource = Arc<dyn TimeSource>;

// =============================================================================
// Values
// =============================================================================

/// Identity of the date type a source produces.
///
/// Two sources with the same prototype produce values that pass each other's
/// `instanceof` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrototypeId(u64);

impl PrototypeId {
    pub(crate) fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Calendar breakdown of an instant. `month` is 1-based.
///
/// When used as constructor input, out-of-range fields roll over into the
/// next unit (day 30 of February becomes a day in March).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millisecond: u32,
}

impl DateFields {
    /// Midnight on the given calendar date.
    pub fn ymd(year: i32, month: u32, day: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour: 0,
            minute: 0,
            second: 0,
            millisecond: 0,
        }
    }

    /// Same calendar date with the time of day taken from `other`.
    pub fn with_time_of(self, other: &DateFields) -> Self {
        Self {
            hour: other.hour,
            minute: other.minute,
            second: other.second,
            millisecond: other.millisecond,
            ..self
        }
    }

    fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
            second: dt.second(),
            millisecond: dt.timestamp_subsec_millis().min(999),
        }
    }

    /// Resolve the fields to a naive date-time, rolling over overflow.
    fn normalize(&self) -> Option<NaiveDateTime> {
        let months = self.year as i64 * 12 + self.month as i64 - 1;
        let year = i32::try_from(months.div_euclid(12)).ok()?;
        let month0 = months.rem_euclid(12) as u32;

        let first = NaiveDate::from_ymd_opt(year, month0 + 1, 1)?;
        let date = first.checked_add_signed(Duration::days(self.day as i64 - 1))?;
        let time_ms = self.hour as i64 * 3_600_000
            + self.minute as i64 * 60_000
            + self.second as i64 * 1_000
            + self.millisecond as i64;

        date.and_hms_opt(0, 0, 0)?
            .checked_add_signed(Duration::milliseconds(time_ms))
    }
}

/// Constructor argument shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateInput<'a> {
    /// No arguments
    Now,
    /// A single epoch-milliseconds number
    Timestamp(i64),
    /// A single date string
    Text(&'a str),
    /// Explicit year, month, day ...
    Fields(DateFields),
}

/// A constructed date value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateValue {
    /// Epoch milliseconds, or None for an invalid date.
    pub epoch_ms: Option<i64>,
    pub prototype: PrototypeId,
}

impl DateValue {
    pub fn new(epoch_ms: Option<i64>, prototype: PrototypeId) -> Self {
        let epoch_ms = epoch_ms.filter(|&ms| in_time_range(ms));
        Self { epoch_ms, prototype }
    }

    pub fn is_valid(&self) -> bool {
        self.epoch_ms.is_some()
    }
}

bitflags::bitflags! {
    /// Entry points a time source exposes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Can be called to construct dates
        const CONSTRUCT = 1 << 0;
        const NOW = 1 << 1;
        const PARSE = 1 << 2;
        const UTC = 1 << 3;
    }
}

// =============================================================================
// Time Source
// =============================================================================

/// The page-global date constructor and its static helpers.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Current instant in epoch milliseconds.
    fn now(&self) -> i64;

    /// Construct a date value.
    fn construct(&self, input: DateInput<'_>) -> DateValue;

    /// Parse a date string to epoch milliseconds.
    fn parse(&self, text: &str) -> Option<i64>;

    /// Epoch milliseconds for calendar fields interpreted as UTC.
    fn utc(&self, fields: &DateFields) -> Option<i64>;

    /// Local calendar breakdown of an instant.
    fn fields(&self, epoch_ms: i64) -> Option<DateFields>;

    /// Type identity of the values this source constructs.
    fn prototype(&self) -> PrototypeId;

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }
}

/// `instanceof` against a source.
pub fn is_instance_of(value: &DateValue, source: &dyn TimeSource) -> bool {
    value.prototype == source.prototype()
}

/// Reference equality of two shared sources.
pub fn same_source(a: &SharedTimeSource, b: &SharedTimeSource) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

// =============================================================================
// System Time Source
// =============================================================================

/// Native time source over a clock and a local timezone.
pub struct SystemTimeSource<Tz: TimeZone, C: Clock = SystemClock> {
    tz: Tz,
    clock: C,
    prototype: PrototypeId,
}

impl<Tz: TimeZone> SystemTimeSource<Tz, SystemClock> {
    pub fn new(tz: Tz) -> Self {
        Self::with_clock(tz, SystemClock)
    }
}

impl<Tz: TimeZone, C: Clock> SystemTimeSource<Tz, C> {
    pub fn with_clock(tz: Tz, clock: C) -> Self {
        Self {
            tz,
            clock,
            prototype: PrototypeId::fresh(),
        }
    }

    fn local_to_epoch(&self, naive: NaiveDateTime) -> Option<i64> {
        // Local times inside a DST gap move forward by the gap length
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| self.tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|dt| dt.timestamp_millis())
    }

    fn parse_text(&self, text: &str) -> Option<i64> {
        let text = text.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.timestamp_millis());
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
            return Some(dt.timestamp_millis());
        }
        // Date-only forms are UTC midnight
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
        }
        // Date-time forms without an offset are local
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return self.local_to_epoch(naive);
            }
        }

        None
    }
}

impl<Tz, C> fmt::Debug for SystemTimeSource<Tz, C>
where
    Tz: TimeZone + fmt::Debug,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTimeSource")
            .field("tz", &self.tz)
            .field("prototype", &self.prototype)
            .finish()
    }
}

impl<Tz, C> TimeSource for SystemTimeSource<Tz, C>
where
    Tz: TimeZone + Send + Sync + fmt::Debug,
    C: Clock,
{
    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    fn construct(&self, input: DateInput<'_>) -> DateValue {
        let epoch_ms = match input {
            DateInput::Now => Some(self.now()),
            DateInput::Timestamp(ms) => Some(ms),
            DateInput::Text(text) => self.parse_text(text),
            DateInput::Fields(fields) => fields.normalize().and_then(|n| self.local_to_epoch(n)),
        };
        DateValue::new(epoch_ms, self.prototype)
    }

    fn parse(&self, text: &str) -> Option<i64> {
        self.parse_text(text)
    }

    fn utc(&self, fields: &DateFields) -> Option<i64> {
        fields.normalize().map(|n| n.and_utc().timestamp_millis())
    }

    fn fields(&self, epoch_ms: i64) -> Option<DateFields> {
        if !in_time_range(epoch_ms) {
            return None;
        }
        let dt = self.tz.timestamp_millis_opt(epoch_ms).single()?;
        Some(DateFields::from_datetime(&dt))
    }

    fn prototype(&self) -> PrototypeId {
        self.prototype
    }
}

// =============================================================================
// Spoofed Time Source
// =============================================================================

/// Replacement source reporting a fixed target instant as "now".
///
/// Construction with explicit dates, strings or timestamps far from the real
/// now is forwarded to the original source unchanged, as are the static
/// helpers and the type identity.
#[derive(Debug)]
pub struct SpoofedTimeSource {
    original: SharedTimeSource,
    target_ms: i64,
}

impl SpoofedTimeSource {
    pub fn new(original: SharedTimeSource, target_ms: i64) -> Self {
        Self { original, target_ms }
    }

    pub fn target_ms(&self) -> i64 {
        self.target_ms
    }

    pub fn original(&self) -> &SharedTimeSource {
        &self.original
    }

    fn target_value(&self) -> DateValue {
        DateValue::new(Some(self.target_ms), self.original.prototype())
    }
}

impl TimeSource for SpoofedTimeSource {
    fn now(&self) -> i64 {
        self.target_ms
    }

    fn construct(&self, input: DateInput<'_>) -> DateValue {
        match input {
            DateInput::Now => self.target_value(),
            // Callers that capture now() and pass it back in
            DateInput::Timestamp(ms) if ms.abs_diff(self.original.now()) < NOW_WINDOW_MS => {
                self.target_value()
            }
            other => self.original.construct(other),
        }
    }

    fn parse(&self, text: &str) -> Option<i64> {
        self.original.parse(text)
    }

    fn utc(&self, fields: &DateFields) -> Option<i64> {
        self.original.utc(fields)
    }

    fn fields(&self, epoch_ms: i64) -> Option<DateFields> {
        self.original.fields(epoch_ms)
    }

    fn prototype(&self) -> PrototypeId {
        self.original.prototype()
    }

    fn capabilities(&self) -> Capabilities {
        self.original.capabilities()
    }
}

// =============================================================================
// Target Time
// =============================================================================

/// Parse a strict `YYYY-MM-DD` string into its numeric parts.
pub fn parse_iso_date(text: &str) -> Option<(i32, u32, u32)> {
    let bytes = text.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = &bytes[range];
        if !part.iter().all(u8::is_ascii_digit) {
            return None;
        }
        Some(part.iter().fold(0u32, |acc, b| acc * 10 + (b - b'0') as u32))
    };
    Some((digits(0..4)? as i32, digits(5..7)?, digits(8..10)?))
}

/// Validate a requested calendar date and anchor it at the current local
/// time of day. Impossible dates (Feb 30) are rejected, not rolled over.
fn requested_target(requested: &str, source: &dyn TimeSource, now_fields: &DateFields) -> Option<i64> {
    let (year, month, day) = parse_iso_date(requested)?;

    if !(1970..=2100).contains(&year) || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let candidate = DateFields::ymd(year, month, day).with_time_of(now_fields);
    let target = source.construct(DateInput::Fields(candidate)).epoch_ms?;
    let check = source.fields(target)?;

    if check.year == year && check.month == month && check.day == day {
        Some(target)
    } else {
        None
    }
}

/// Compute the instant the override reports.
///
/// Uses the requested `YYYY-MM-DD` date at the current time of day when it is
/// valid, and the same time tomorrow otherwise.
pub fn compute_target_time(requested: Option<&str>, source: &dyn TimeSource) -> i64 {
    let now = source.now();
    let Some(now_fields) = source.fields(now) else {
        return now + DAY_MS;
    };

    if let Some(requested) = requested {
        if let Some(target) = requested_target(requested, source, &now_fields) {
            return target;
        }
        log::debug!("rejected spoof date '{}', falling back to tomorrow", requested);
    }

    tomorrow_from(source, &now_fields).unwrap_or(now + DAY_MS)
}

fn tomorrow_from(source: &dyn TimeSource, now_fields: &DateFields) -> Option<i64> {
    let tomorrow = DateFields {
        day: now_fields.day + 1,
        ..*now_fields
    };
    source.construct(DateInput::Fields(tomorrow)).epoch_ms
}

/// Tomorrow's local calendar date as `YYYY-MM-DD`.
pub fn tomorrow_iso(source: &dyn TimeSource) -> String {
    let now = source.now();
    let date = source
        .fields(now)
        .and_then(|fields| tomorrow_from(source, &fields))
        .and_then(|ms| source.fields(ms))
        .map(|f| (f.year, f.month, f.day))
        .or_else(|| {
            Utc.timestamp_millis_opt(now + DAY_MS)
                .single()
                .map(|dt| (dt.year(), dt.month(), dt.day()))
        })
        .unwrap_or((1970, 1, 2));
    format!("{:04}-{:02}-{:02}", date.0, date.1, date.2)
}
