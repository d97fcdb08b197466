//! Time sources for the cooperative loop.
//!
//! The loop reasons about a wrapping millisecond counter, the same way a
//! microcontroller `millis()` behaves: comparisons are always done on the
//! unsigned difference `now - since`, never on absolute values.

use std::time::Instant;

use time::macros::format_description;
use time::OffsetDateTime;

/// Returned when the wall clock cannot be formatted (never expected in
/// practice).
const EPOCH_TIMESTAMP: &str = "1970-01-01T00:00:00Z";

pub(crate) trait Clock {
    /// Monotonic milliseconds since an arbitrary origin. Wraps at `u32::MAX`.
    fn now_ms(&self) -> u32;

    /// Current UTC wall-clock time as `YYYY-MM-DDTHH:MM:SSZ`.
    fn timestamp(&self) -> String;
}

/// True once at least `interval` milliseconds have passed since `since`.
/// Correct across a wrap of the counter.
pub(crate) fn interval_elapsed(now: u32, since: u32, interval: u32) -> bool {
    now.wrapping_sub(since) >= interval
}

pub(crate) struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wrap.
        self.origin.elapsed().as_millis() as u32
    }

    fn timestamp(&self) -> String {
        format_utc(OffsetDateTime::now_utc())
    }
}

pub(crate) fn format_utc(at: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    at.format(&fmt)
        .unwrap_or_else(|_| EPOCH_TIMESTAMP.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn interval_elapsed_simple() {
        assert!(!interval_elapsed(999, 0, 1000));
        assert!(interval_elapsed(1000, 0, 1000));
        assert!(interval_elapsed(5000, 0, 1000));
    }

    #[test]
    fn interval_elapsed_across_wrap() {
        let since = u32::MAX - 100;
        // 100 ms before the wrap plus 900 ms after it.
        assert!(interval_elapsed(899, since, 1000));
        assert!(!interval_elapsed(898, since, 1000));
    }

    #[test]
    fn interval_zero_always_elapsed() {
        assert!(interval_elapsed(7, 7, 0));
    }

    #[test]
    fn format_utc_matches_wire_form() {
        let at = datetime!(2025-06-01 08:04:09 UTC);
        assert_eq!(format_utc(at), "2025-06-01T08:04:09Z");
    }

    #[test]
    fn system_clock_timestamp_has_fixed_width() {
        let clock = SystemClock::new();
        let ts = clock.timestamp();
        assert_eq!(ts.len(), 20, "unexpected timestamp {ts}");
        assert!(ts.ends_with('Z'));
    }
}
