//! Quiet-hours window arithmetic
//!
//! Times are device-local 24-hour `HH:MM` strings. A window whose start is
//! later than its end wraps across midnight. Both ends are inclusive.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Quiet-hours schedule as persisted and exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHoursSchedule {
    pub quiet: bool,
    pub quiet_hours_start: String,
    pub quiet_hours_end: String,
}

impl Default for QuietHoursSchedule {
    fn default() -> Self {
        Self {
            quiet: false,
            quiet_hours_start: "22:00".to_string(),
            quiet_hours_end: "08:00".to_string(),
        }
    }
}

/// Parse `HH:MM` into minutes since midnight
pub fn parse_minutes(value: &str) -> Option<u32> {
    let (h, m) = value.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

/// Minutes since midnight for a wall-clock time (seconds are dropped)
pub fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

impl QuietHoursSchedule {
    /// Whether `now` (minutes since midnight) falls inside the quiet window
    pub fn is_quiet_at(&self, now: u32) -> bool {
        if !self.quiet {
            return false;
        }

        let (Some(start), Some(end)) = (
            parse_minutes(&self.quiet_hours_start),
            parse_minutes(&self.quiet_hours_end),
        ) else {
            tracing::warn!(
                start = %self.quiet_hours_start,
                end = %self.quiet_hours_end,
                "Quiet hours schedule has unparseable times, ignoring"
            );
            return false;
        };

        if start <= end {
            start <= now && now <= end
        } else {
            // Wraps midnight
            now >= start || now <= end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(start: &str, end: &str) -> QuietHoursSchedule {
        QuietHoursSchedule {
            quiet: true,
            quiet_hours_start: start.to_string(),
            quiet_hours_end: end.to_string(),
        }
    }

    fn at(h: u32, m: u32) -> u32 {
        h * 60 + m
    }

    #[test]
    fn test_parse_minutes() {
        assert_eq!(parse_minutes("00:00"), Some(0));
        assert_eq!(parse_minutes("22:30"), Some(1350));
        assert_eq!(parse_minutes("7:05"), Some(425));
        assert_eq!(parse_minutes("24:00"), None);
        assert_eq!(parse_minutes("12:60"), None);
        assert_eq!(parse_minutes("noon"), None);
        assert_eq!(parse_minutes(""), None);
    }

    #[test]
    fn test_wrapping_window() {
        let s = schedule("22:00", "08:00");
        assert!(s.is_quiet_at(at(23, 30)));
        assert!(s.is_quiet_at(at(5, 0)));
        assert!(s.is_quiet_at(at(22, 0)));
        assert!(s.is_quiet_at(at(8, 0)));
        assert!(!s.is_quiet_at(at(12, 0)));
        assert!(!s.is_quiet_at(at(8, 1)));
    }

    #[test]
    fn test_non_wrapping_window() {
        let s = schedule("08:00", "22:00");
        assert!(s.is_quiet_at(at(12, 0)));
        assert!(!s.is_quiet_at(at(23, 0)));
        assert!(!s.is_quiet_at(at(7, 59)));
    }

    #[test]
    fn test_disabled_schedule_is_never_quiet() {
        let mut s = schedule("00:00", "23:59");
        s.quiet = false;
        assert!(!s.is_quiet_at(at(12, 0)));
    }

    #[test]
    fn test_unparseable_schedule_is_inert() {
        let s = schedule("late", "08:00");
        assert!(!s.is_quiet_at(at(3, 0)));
    }

    #[test]
    fn test_minutes_of_drops_seconds() {
        let t = NaiveTime::from_hms_opt(23, 30, 59).unwrap();
        assert_eq!(minutes_of(t), at(23, 30));
    }
}
