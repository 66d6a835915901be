//! Time utilities for tether
//!
//! Everything the engine schedules (night mode, unlock expiry, call watch
//! deadlines, day rollover) is expressed in local wall-clock time so that it
//! survives a process restart.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `TETHER_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations. This is useful
//! for exercising night mode and the daily rollover by hand.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 23:30:00`)
//!
//! Example:
//! ```bash
//! TETHER_MOCK_TIME="2025-12-25 23:30:00" tetherd
//! ```

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "TETHER_MOCK_TIME";

/// Offset between mock time and real time, computed once per process.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S") {
                    Ok(naive_dt) => {
                        if let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() {
                            let offset = mock_dt.signed_duration_since(chrono::Local::now());
                            tracing::info!(
                                mock_time = %mock_time_str,
                                offset_secs = offset.num_seconds(),
                                "Mock time enabled"
                            );
                            return Some(offset);
                        }
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            "Failed to convert mock time to local timezone"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = "%Y-%m-%d %H:%M:%S",
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Local midnight at the start of `dt`'s calendar day.
///
/// Falls back to `dt` itself on the rare DST transition where local
/// midnight does not exist.
pub fn start_of_day(dt: &DateTime<Local>) -> DateTime<Local> {
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .unwrap_or(*dt)
}

/// Calendar day of a local timestamp
pub fn day_of(dt: &DateTime<Local>) -> NaiveDate {
    dt.date_naive()
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Seconds elapsed from `earlier` to `later`, zero if `later` is not after `earlier`
pub fn elapsed_between(earlier: DateTime<Local>, later: DateTime<Local>) -> Duration {
    later
        .signed_duration_since(earlier)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Hour-of-day window `[start_hour, end_hour)` that may wrap past midnight.
///
/// `start_hour == end_hour` describes an empty window (night mode off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl NightWindow {
    pub fn new(start_hour: u8, end_hour: u8) -> Option<Self> {
        if start_hour < 24 && end_hour < 24 {
            Some(Self {
                start_hour,
                end_hour,
            })
        } else {
            None
        }
    }

    /// Window that never contains any hour
    pub fn disabled() -> Self {
        Self {
            start_hour: 0,
            end_hour: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start_hour == self.end_hour
    }

    /// Check whether an hour of the day (0-23) falls inside the window
    pub fn contains_hour(&self, hour: u8) -> bool {
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else if self.start_hour > self.end_hour {
            // Crosses midnight (e.g., 22 - 6)
            hour >= self.start_hour || hour < self.end_hour
        } else {
            false
        }
    }

    /// Check whether a local timestamp falls inside the window
    pub fn contains(&self, dt: &DateTime<Local>) -> bool {
        self.contains_hour(dt.hour() as u8)
    }
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
