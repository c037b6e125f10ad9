//! Wall clock abstraction
//!
//! The master stamps the well-known users bucket at startup; tests swap
//! in a fixed clock to get deterministic records.

use chrono::{SecondsFormat, Utc};

/// Source of ISO-8601 UTC timestamps.
pub trait Clock: Send + Sync {
    /// Current time as an ISO-8601 UTC string with millisecond precision.
    fn now(&self) -> String;
}

/// System wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_format() {
        let now = SystemClock.now();
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}
