//! Interval policy and persisted timestamp handling.
//!
//! All configured intervals in the library (poll delays, rule trigger
//! intervals, stall windows) pass through an [`IntervalPolicy`], which scales
//! them by a single multiplier. Production runs with a multiplier of 1.0;
//! development and tests shrink it (via `DEV_INTERVAL_MULTIPLIER`) so that
//! hour-scale behavior can be observed in seconds.
//!
//! This module also owns the persisted time format: ISO-8601 UTC with
//! millisecond precision. The parser tolerates both `T` and space separators
//! and an optional trailing `Z`, since rows written by earlier versions of
//! the controller used the space form.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower bound of the interval multiplier (1000x speedup for tests)
pub const MIN_MULTIPLIER: f64 = 0.001;
/// Upper bound of the interval multiplier (production speed)
pub const MAX_MULTIPLIER: f64 = 1.0;

/// Minimum poll delay in minutes when running at production speed
const PRODUCTION_POLL_FLOOR_MINUTES: f64 = 5.0;
/// Minimum poll delay in minutes when the multiplier is reduced for testing
const TEST_POLL_FLOOR_MINUTES: f64 = 0.1;

/// Scales every configured interval by a single multiplier.
///
/// The multiplier is clamped to `0.001..=1.0`. A multiplier below 1.0 also
/// switches the minimum poll delay from the production floor (5 minutes) to
/// the test floor (0.1 minutes).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalPolicy {
    multiplier: f64,
}

impl IntervalPolicy {
    /// Create a policy with the given multiplier, clamped to the valid range
    pub fn new(multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() {
            multiplier.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
        } else {
            MAX_MULTIPLIER
        };
        Self { multiplier }
    }

    /// Production policy (multiplier 1.0)
    pub fn production() -> Self {
        Self::new(MAX_MULTIPLIER)
    }

    /// The effective multiplier
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Scale a wall-clock duration by the multiplier
    pub fn scale(&self, base: Duration) -> Duration {
        base.mul_f64(self.multiplier)
    }

    /// Scale a duration expressed in minutes, returning a chrono duration
    /// suitable for timestamp arithmetic
    pub fn scale_minutes(&self, minutes: f64) -> chrono::Duration {
        let millis = minutes * self.multiplier * 60_000.0;
        chrono::Duration::milliseconds(millis.round() as i64)
    }

    /// Minimum delay between two polls of the same user
    ///
    /// 5 minutes at production speed, 0.1 minutes when the multiplier is
    /// reduced for testing.
    pub fn poll_floor(&self) -> chrono::Duration {
        let minutes = if self.multiplier >= MAX_MULTIPLIER {
            PRODUCTION_POLL_FLOOR_MINUTES
        } else {
            TEST_POLL_FLOOR_MINUTES
        };
        chrono::Duration::milliseconds((minutes * 60_000.0).round() as i64)
    }

    /// Scale a poll delay expressed in minutes and clamp it to the floor
    pub fn poll_delay(&self, minutes: f64) -> chrono::Duration {
        self.scale_minutes(minutes).max(self.poll_floor())
    }
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self::production()
    }
}

/// Format a timestamp in the persisted form: ISO-8601 UTC with millisecond
/// precision and a `Z` suffix (e.g. `2026-08-01T09:30:00.000Z`)
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse a persisted timestamp.
///
/// Accepts the canonical form produced by [`format_timestamp`] as well as a
/// space separator instead of `T`, a missing `Z`, an explicit offset, and any
/// fractional-second precision. Returns `None` for empty or malformed input.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    // Tolerated legacy forms: space separator, optional Z, no offset
    let normalized = s.replacen(' ', "T", 1);
    let trimmed = normalized.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse an optional persisted timestamp column.
///
/// `None`, empty, and malformed values all map to `None`; malformed values
/// additionally log at debug level so silently-dropped rows can be traced.
pub fn parse_timestamp_opt(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        tracing::debug!(value = raw, "discarding unparseable timestamp");
    }
    parsed
}
