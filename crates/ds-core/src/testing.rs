//! Test doubles for host behavior that is hard to reproduce otherwise.

use crate::time_source::{Capabilities, DateFields, DateInput, DateValue, PrototypeId, TimeSource};

/// A time source missing some of its static helpers, the way a page script
/// that clobbered the date global would leave it.
///
/// Every call answers with the epoch (or nothing).
#[derive(Debug)]
pub struct CrippledTimeSource {
    capabilities: Capabilities,
    prototype: PrototypeId,
}

impl CrippledTimeSource {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            prototype: PrototypeId::fresh(),
        }
    }
}

impl TimeSource for CrippledTimeSource {
    fn now(&self) -> i64 {
        0
    }

    fn construct(&self, _input: DateInput<'_>) -> DateValue {
        DateValue::new(Some(0), self.prototype)
    }

    fn parse(&self, _text: &str) -> Option<i64> {
        None
    }

    fn utc(&self, _fields: &DateFields) -> Option<i64> {
        None
    }

    fn fields(&self, _epoch_ms: i64) -> Option<DateFields> {
        None
    }

    fn prototype(&self) -> PrototypeId {
        self.prototype
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}
