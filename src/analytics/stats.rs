// Derived usage statistics
//
// Pure functions over the analytics root. Day buckets use a fixed 24h day and
// floor division on the elapsed milliseconds, not calendar midnights: two
// sessions 23h apart that straddle local midnight can land in the same
// bucket. The install-stats chart is drawn from these buckets as-is.

use super::{AnalyticsRoot, NotificationStats, OfflineUsageStats};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Milliseconds in one bucket day
pub const DAY_MS: i64 = 86_400_000;

/// Snapshot of derived statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_sessions: usize,
    /// Mean length of closed sessions in milliseconds, 0 if none closed
    pub average_session_length: i64,
    /// Index 6 is today, index 0 is six days ago
    pub last_week_sessions: [u32; 7],
    /// Local calendar date (`YYYY-MM-DD`) to session count
    pub sessions_per_day: BTreeMap<String, u32>,
    pub events: usize,
    pub install_date: Option<DateTime<Utc>>,
    pub notifications: NotificationStats,
    pub offline: OfflineUsageStats,
}

pub fn compute(root: &AnalyticsRoot, now: DateTime<Utc>) -> Stats {
    let (total_ms, closed) = root
        .sessions
        .iter()
        .filter_map(|s| s.end_time.map(|end| (end - s.start_time).num_milliseconds()))
        .fold((0i64, 0i64), |(sum, n), ms| (sum + ms, n + 1));
    let average_session_length = if closed == 0 { 0 } else { total_ms / closed };

    let mut last_week_sessions = [0u32; 7];
    for session in &root.sessions {
        let days = (now - session.start_time).num_milliseconds().div_euclid(DAY_MS);
        if (0..7).contains(&days) {
            // days is 0..=6 here
            last_week_sessions[(6 - days) as usize] += 1;
        }
    }

    let mut sessions_per_day = BTreeMap::new();
    for session in &root.sessions {
        let date = session
            .start_time
            .with_timezone(&Local)
            .format("%Y-%m-%d")
            .to_string();
        *sessions_per_day.entry(date).or_insert(0) += 1;
    }

    Stats {
        total_sessions: root.sessions.len(),
        average_session_length,
        last_week_sessions,
        sessions_per_day,
        events: root.events.len(),
        install_date: root.install_date,
        notifications: root.notifications.clone(),
        offline: root.offline.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::SessionRecord;
    use chrono::{Duration, TimeZone};

    fn session(start: DateTime<Utc>, len: Option<Duration>) -> SessionRecord {
        SessionRecord {
            start_time: start,
            end_time: len.map(|d| start + d),
            events: Vec::new(),
            is_standalone: false,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_average_excludes_open_sessions() {
        let mut root = AnalyticsRoot::default();
        root.sessions.push(session(now() - Duration::hours(3), Some(Duration::seconds(10))));
        root.sessions.push(session(now() - Duration::hours(2), Some(Duration::seconds(20))));
        root.sessions.push(session(now() - Duration::hours(1), None));

        let stats = compute(&root, now());
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.average_session_length, 15_000);
    }

    #[test]
    fn test_average_is_zero_without_closed_sessions() {
        let mut root = AnalyticsRoot::default();
        root.sessions.push(session(now(), None));
        assert_eq!(compute(&root, now()).average_session_length, 0);
        assert_eq!(compute(&AnalyticsRoot::default(), now()).average_session_length, 0);
    }

    #[test]
    fn test_last_week_buckets_use_floor_of_elapsed_days() {
        let mut root = AnalyticsRoot::default();
        // today
        root.sessions.push(session(now() - Duration::minutes(5), None));
        // 23h59m ago still counts as today
        root.sessions.push(session(now() - Duration::minutes(23 * 60 + 59), None));
        // exactly one day ago
        root.sessions.push(session(now() - Duration::days(1), None));
        // six and a half days ago
        root.sessions.push(session(now() - Duration::hours(6 * 24 + 12), None));
        // seven days ago is excluded
        root.sessions.push(session(now() - Duration::days(7), None));
        // future start (clock skew) is excluded
        root.sessions.push(session(now() + Duration::hours(1), None));

        let stats = compute(&root, now());
        assert_eq!(stats.last_week_sessions, [1, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_sessions_per_day_uses_local_dates() {
        let mut root = AnalyticsRoot::default();
        let first = Local
            .with_ymd_and_hms(2026, 6, 14, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let second = Local
            .with_ymd_and_hms(2026, 6, 14, 18, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let third = Local
            .with_ymd_and_hms(2026, 6, 15, 8, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        for start in [first, second, third] {
            root.sessions.push(session(start, None));
        }

        let stats = compute(&root, now());
        assert_eq!(stats.sessions_per_day.get("2026-06-14"), Some(&2));
        assert_eq!(stats.sessions_per_day.get("2026-06-15"), Some(&1));
    }
}
