// SPDX-License-Identifier: MIT
//! PatchMaster timestamps
//!
//! Times are stored as doubles counting seconds from a Macintosh-era epoch,
//! offset by a constant that puts 1990-01-01 at `JAN_FIRST_1990_MAC_TIME`.
//! The conversion below follows the producer's documentation and is exact
//! to the second at best.

use chrono::{DateTime, Utc};

/// Seconds between the Mac epoch (1904) and the Unix epoch (1970)
const EPOCH_DIFF_MAC_UNIX: i64 = 2_082_844_800;

/// PatchMaster's stored value for 1990-01-01
const JAN_FIRST_1990_MAC_TIME: f64 = 1_580_970_496.0;

const HIGH_DWORD: f64 = 4_294_967_296.0;

/// Rendered when a timestamp cannot be represented
pub const CONVERSION_ERROR: &str = "<conversion error>";

/// Convert a stored time to Unix seconds
pub fn to_unix_seconds(t: f64) -> Option<i64> {
    if !t.is_finite() {
        return None;
    }
    let mut t = t - JAN_FIRST_1990_MAC_TIME;
    if t < 0.0 {
        // stored values wrap around at 2^32
        t += HIGH_DWORD;
    }
    let seconds = t.floor();
    if seconds.abs() > i64::MAX as f64 / 2.0 {
        return None;
    }
    Some(seconds as i64 - EPOCH_DIFF_MAC_UNIX)
}

/// Convert a stored time to a UTC date-time
pub fn to_datetime(t: f64) -> Option<DateTime<Utc>> {
    to_unix_seconds(t).and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Date part only, `YYYY-MM-DD`
pub fn format_date(t: f64) -> String {
    to_datetime(t)
        .map(|dt| dt.format("%F").to_string())
        .unwrap_or_else(|| CONVERSION_ERROR.to_string())
}

/// Date and UTC time, `YYYY-MM-DDTHH:MM:SS UTC`
pub fn format_utc(t: f64) -> String {
    to_datetime(t)
        .map(|dt| dt.format("%FT%T UTC").to_string())
        .unwrap_or_else(|| CONVERSION_ERROR.to_string())
}

/// Inverse of [`to_unix_seconds`] for times after 1990, used to build fixtures
pub fn from_unix_seconds(secs: i64) -> f64 {
    let mut t = (secs + EPOCH_DIFF_MAC_UNIX) as f64;
    if t >= HIGH_DWORD {
        t -= HIGH_DWORD;
    }
    t + JAN_FIRST_1990_MAC_TIME
}
