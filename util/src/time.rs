//! General time utility functions

use std::time::Duration;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a chrono duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Get the period of a loop running at the given frequency.
///
/// Returns `None` if the frequency is not a finite, strictly positive number, or if the period
/// is too long to be represented.
pub fn hz_to_period(freq_hz: f64) -> Option<Duration> {
    if freq_hz.is_finite() && freq_hz > 0.0 {
        secs_to_duration(1.0 / freq_hz)
    }
    else {
        None
    }
}

/// Convert a number of seconds into a duration.
///
/// Returns `None` if the value is not a finite, strictly positive number, or is too large to be
/// represented.
pub fn secs_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    }
    else {
        None
    }
}
