//! Timestamp utilities
//!
//! Stream timestamps are integer ticks in a per-stream time-base (a rational
//! number of seconds per tick). All playback positions exchanged between the
//! AVP components are signed milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Rational conversion factor from stream ticks to seconds (`num / den`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    /// One tick per millisecond
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    /// 90 kHz clock used by most video containers
    pub const MPEG: TimeBase = TimeBase { num: 1, den: 90_000 };

    /// Create a time-base; a zero numerator or denominator falls back to milliseconds
    pub fn new(num: u32, den: u32) -> Self {
        if num == 0 || den == 0 {
            Self::MILLIS
        } else {
            Self { num, den }
        }
    }

    /// Time-base with one tick per sample at `sample_rate`
    pub fn from_sample_rate(sample_rate: u32) -> Self {
        Self::new(1, sample_rate)
    }

    /// Convert ticks to milliseconds (truncating toward zero)
    pub fn ticks_to_ms(&self, ticks: i64) -> i64 {
        let ms = ticks as i128 * self.num as i128 * 1000 / self.den as i128;
        ms.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Convert milliseconds to ticks (truncating toward zero)
    pub fn ms_to_ticks(&self, ms: i64) -> i64 {
        let ticks = ms as i128 * self.den as i128 / (self.num as i128 * 1000);
        ticks.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MILLIS
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Format a playback position as `M:SS.mmm` (`H:MM:SS.mmm` past one hour)
///
/// # Examples
///
/// ```
/// use avp_common::time::format_position;
///
/// assert_eq!(format_position(0), "0:00.000");
/// assert_eq!(format_position(65_250), "1:05.250");
/// assert_eq!(format_position(3_723_004), "1:02:03.004");
/// assert_eq!(format_position(-1_500), "-0:01.500");
/// ```
pub fn format_position(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let abs = ms.unsigned_abs();
    let millis = abs % 1000;
    let total_secs = abs / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;

    if total_mins >= 60 {
        format!(
            "{}{}:{:02}:{:02}.{:03}",
            sign,
            total_mins / 60,
            total_mins % 60,
            secs,
            millis
        )
    } else {
        format!("{}{}:{:02}.{:03}", sign, total_mins, secs, millis)
    }
}
