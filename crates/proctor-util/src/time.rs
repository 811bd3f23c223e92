//! Clock helpers for proctord
//!
//! Schedule times are stored as wall-clock strings (`HH:MM`, sometimes
//! `HH:MM:SS`) attached to a calendar date. All window arithmetic happens on
//! naive local date-times so that a session keeps its printed start and end
//! regardless of DST transitions.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `PROCTOR_MOCK_TIME` environment variable can be set
//! to override the system time for every time-sensitive operation. Useful
//! for walking a schedule through its display windows by hand.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-03-10 07:55:00`)
//!
//! Example:
//! ```bash
//! PROCTOR_MOCK_TIME="2025-03-10 07:55:00" cargo run -p proctord
//! ```

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "PROCTOR_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between mock time and real time, computed once at first use so
/// that mock time keeps advancing with the real clock.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let raw = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let offset = mock_offset(&raw, chrono::Local::now())?;
            tracing::info!(
                mock_time = %raw,
                offset_secs = offset.num_seconds(),
                "Mock time enabled"
            );
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Offset that moves `real_now` to the mock time in `raw`.
#[cfg_attr(not(debug_assertions), allow(dead_code))]
fn mock_offset(raw: &str, real_now: DateTime<Local>) -> Option<chrono::Duration> {
    let Ok(naive_dt) = NaiveDateTime::parse_from_str(raw.trim(), MOCK_TIME_FORMAT) else {
        tracing::warn!(
            mock_time = %raw,
            expected_format = MOCK_TIME_FORMAT,
            "Invalid mock time format"
        );
        return None;
    };
    let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() else {
        tracing::warn!(mock_time = %raw, "Mock time is ambiguous in the local timezone");
        return None;
    };
    Some(mock_dt.signed_duration_since(real_now))
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Current local time, shifted by `PROCTOR_MOCK_TIME` in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Parse a schedule clock string. Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_clock(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Format a time the way the dashboard expects it (`HH:MM`).
pub fn format_clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Resolve a clock string against a calendar date.
pub fn at_date(date: NaiveDate, clock: &str) -> Option<NaiveDateTime> {
    parse_clock(clock).map(|t| date.and_time(t))
}

/// Whole minutes from `from` until `to`, rounded up.
///
/// A start that is 4m10s away reports 5 minutes; a start that already
/// passed reports zero or a negative count.
pub fn minutes_until_ceil(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    let ms = (to - from).num_milliseconds();
    -(-ms).div_euclid(60_000)
}

/// Whole minutes elapsed from `from` to `to`, rounded down.
pub fn minutes_since_floor(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    (to - from).num_milliseconds().div_euclid(60_000)
}
