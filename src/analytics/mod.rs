// Usage analytics - append-only session and event log
//
// Records sessions, events, notification counters and offline usage for the
// install-stats screen. Data lives in one local key-value slot, is written
// through after every change, and is never synced anywhere.
//
// Events are stored twice: once in the flat `events` list for
// global queries and once inside the session they happened in.

mod stats;

use crate::clock::{Clock, SharedClock};
use crate::storage::{self, SharedStore, ANALYTICS_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use stats::Stats;

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub action: String,
    pub label: Option<String>,
    pub is_standalone: bool,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub is_standalone: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationStats {
    pub granted: bool,
    pub subscribed: bool,
    pub received: u64,
    pub clicked: u64,
    pub categories: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OfflineUsageStats {
    pub usage: u64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Root analytics aggregate, persisted as one blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyticsRoot {
    pub install_date: Option<DateTime<Utc>>,
    pub sessions: Vec<SessionRecord>,
    pub events: Vec<EventRecord>,
    pub notifications: NotificationStats,
    pub offline: OfflineUsageStats,
}

/// Notification lifecycle transitions worth counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Grant,
    Subscribe,
    Receive,
    Click,
}

impl NotificationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grant => "grant",
            Self::Subscribe => "subscribe",
            Self::Receive => "receive",
            Self::Click => "click",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Usage log
// ─────────────────────────────────────────────────────────────────────────────

/// Session and event recorder bound to one key of the key-value backend
pub struct UsageLog {
    data: AnalyticsRoot,
    store: SharedStore,
    clock: SharedClock,
    standalone: bool,
    online: bool,
}

impl UsageLog {
    /// Load existing data without opening a session
    pub fn load(store: SharedStore, clock: SharedClock, standalone: bool) -> Self {
        let data = storage::load_json(store.as_ref(), ANALYTICS_KEY).unwrap_or_else(|| {
            tracing::debug!("No stored analytics, starting fresh");
            AnalyticsRoot::default()
        });
        Self {
            data,
            store,
            clock,
            standalone,
            online: true,
        }
    }

    /// Load existing data and open a session for this process
    pub fn new(store: SharedStore, clock: SharedClock, standalone: bool) -> Self {
        let mut log = Self::load(store, clock, standalone);
        log.start_session();
        log
    }

    pub fn data(&self) -> &AnalyticsRoot {
        &self.data
    }

    /// Connectivity as last reported by the worker
    pub fn set_online(&mut self, online: bool) {
        if self.online != online {
            tracing::info!(online, "Connectivity changed");
        }
        self.online = online;
    }

    /// Open a new session; it becomes the current one
    pub fn start_session(&mut self) {
        self.data.sessions.push(SessionRecord {
            start_time: self.clock.now(),
            end_time: None,
            events: Vec::new(),
            is_standalone: self.standalone,
        });
        self.persist();
        tracing::debug!(sessions = self.data.sessions.len(), "Session started");
    }

    /// Close the current session (shutdown hook)
    ///
    /// Does nothing if the last session is already closed.
    pub fn end_session(&mut self) {
        let now = self.clock.now();
        let Some(current) = self.data.sessions.last_mut() else {
            return;
        };
        if current.end_time.is_some() {
            return;
        }
        current.end_time = Some(now);
        let length_ms = (now - current.start_time).num_milliseconds();
        self.persist();
        tracing::debug!(length_ms, "Session ended");
    }

    /// Record an event in the flat log and the current session
    pub fn track_event(&mut self, category: &str, action: &str, label: Option<&str>) {
        let event = EventRecord {
            timestamp: self.clock.now(),
            category: category.to_string(),
            action: action.to_string(),
            label: label.map(str::to_string),
            is_standalone: self.standalone,
            online: self.online,
        };

        self.data.events.push(event.clone());
        if let Some(current) = self.data.sessions.last_mut() {
            current.events.push(event);
        }
        self.persist();
    }

    /// Record the install date once; later calls only leave it alone
    pub fn track_install(&mut self) {
        if self.data.install_date.is_some() {
            return;
        }
        self.data.install_date = Some(self.clock.now());
        self.track_event("pwa", "install", None);
        tracing::info!("App install recorded");
    }

    pub fn track_notification(&mut self, action: NotificationAction, category: Option<&str>) {
        let counters = &mut self.data.notifications;
        match action {
            NotificationAction::Grant => counters.granted = true,
            NotificationAction::Subscribe => counters.subscribed = true,
            NotificationAction::Receive => {
                counters.received += 1;
                if let Some(category) = category {
                    *counters.categories.entry(category.to_string()).or_insert(0) += 1;
                }
            }
            NotificationAction::Click => counters.clicked += 1,
        }
        self.track_event("notification", action.as_str(), category);
    }

    pub fn track_offline_usage(&mut self) {
        self.data.offline.usage += 1;
        self.data.offline.last_used = Some(self.clock.now());
        self.track_event("offline", "use", None);
    }

    /// Derived statistics as of now
    pub fn stats(&self) -> Stats {
        stats::compute(&self.data, self.clock.now())
    }

    /// Erase everything and persist the empty state
    ///
    /// Callers are responsible for confirming with the user first.
    pub fn clear_data(&mut self) {
        self.data = AnalyticsRoot::default();
        self.persist();
        tracing::info!("Analytics data cleared");
    }

    fn persist(&self) {
        if let Err(e) = storage::save_json(self.store.as_ref(), ANALYTICS_KEY, &self.data) {
            tracing::error!("Failed to persist analytics: {:#}", e);
        }
    }
}
