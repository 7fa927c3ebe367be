// Date arithmetic and duration formatting for countdown displays

mod ticker;

pub use ticker::Countdown;

use chrono::{DateTime, Utc};
use serde::Serialize;

const MS_PER_SECOND: i64 = 1000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Absolute difference between two instants, split into display units
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeDifference {
    pub total_days: i64,
    pub total_hours: i64,
    pub total_minutes: i64,
    pub total_seconds: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub is_target_in_future: bool,
}

impl TimeDifference {
    pub fn between(target: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let total_ms = (target - now).num_milliseconds().abs();

        let total_seconds = total_ms / MS_PER_SECOND;
        let total_minutes = total_seconds / 60;
        let total_hours = total_minutes / 60;
        let total_days = total_hours / 24;

        Self {
            total_days,
            total_hours,
            total_minutes,
            total_seconds,
            days: total_ms / MS_PER_DAY,
            hours: (total_ms % MS_PER_DAY) / MS_PER_HOUR,
            minutes: (total_ms % MS_PER_HOUR) / MS_PER_MINUTE,
            seconds: (total_ms % MS_PER_MINUTE) / MS_PER_SECOND,
            is_target_in_future: target > now,
        }
    }

    /// Human readable form, e.g. "3 days, 1 hour, 5 seconds"
    pub fn formatted(&self) -> String {
        format_duration(self.days, self.hours, self.minutes, self.seconds)
    }
}

/// Join the non-zero units with correct pluralisation.
/// Returns "0 seconds" when every unit is zero.
pub fn format_duration(days: i64, hours: i64, minutes: i64, seconds: i64) -> String {
    let parts: Vec<String> = [
        (days, "day"),
        (hours, "hour"),
        (minutes, "minute"),
        (seconds, "second"),
    ]
    .iter()
    .filter(|(value, _)| *value > 0)
    .map(|(value, unit)| {
        if *value == 1 {
            format!("{} {}", value, unit)
        } else {
            format!("{} {}s", value, unit)
        }
    })
    .collect();

    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(", ")
    }
}

/// Player clock display, "MM:SS". Minutes are not wrapped into hours.
pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "00:00".to_string();
    }
    let whole = seconds.floor() as u64;
    format!("{:02}:{:02}", whole / 60, whole % 60)
}

/// A named day count worth celebrating
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Milestone {
    pub name: &'static str,
    pub days: i64,
    pub days_remaining: i64,
    /// Percent of the way there, 0..100
    pub progress: f64,
}

const MILESTONES: &[(i64, &str)] = &[
    (30, "1 Month Together"),
    (100, "100 Days Together"),
    (200, "200 Days Together"),
    (365, "1 Year Together"),
    (500, "500 Days Together"),
    (730, "2 Years Together"),
    (1000, "1000 Days Together"),
    (1095, "3 Years Together"),
    (1460, "4 Years Together"),
    (1825, "5 Years Together"),
];

/// First milestone strictly after `total_days`, or None once all are passed
pub fn next_milestone(total_days: i64) -> Option<Milestone> {
    MILESTONES
        .iter()
        .find(|(days, _)| *days > total_days)
        .map(|(days, name)| Milestone {
            name: *name,
            days: *days,
            days_remaining: days - total_days,
            progress: (total_days.max(0) as f64 / *days as f64) * 100.0,
        })
}
