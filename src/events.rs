// Events that flow from the worker side to the app side
//
// The worker never touches the app-side stores directly. It reports what
// happened over an mpsc channel and the app side folds those reports into
// the usage log.

use crate::analytics::{NotificationAction, UsageLog};
use crate::worker::WorkerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Something the worker wants the app side to know about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")] // Creates JSON like {"type": "NotificationShown", ...}
pub enum WorkerEvent {
    /// Lifecycle state transition
    StateChanged {
        timestamp: DateTime<Utc>,
        state: WorkerState,
    },

    /// Install finished and the precache is populated
    Installed {
        timestamp: DateTime<Utc>,
        cache: String,
        assets: usize,
    },

    /// Activation finished; stale caches were removed
    Activated {
        timestamp: DateTime<Utc>,
        cache: String,
        evicted: Vec<String>,
    },

    /// Network reachability as observed by fetches
    Connectivity {
        timestamp: DateTime<Utc>,
        online: bool,
    },

    /// A request was answered from cache because the network failed
    OfflineServed {
        timestamp: DateTime<Utc>,
        path: String,
        /// True when the offline fallback page was used
        fallback: bool,
    },

    /// A push became a visible notification
    NotificationShown {
        timestamp: DateTime<Utc>,
        id: String,
        category: Option<String>,
    },

    /// A push was dropped by the preference filter
    NotificationSuppressed {
        timestamp: DateTime<Utc>,
        category: Option<String>,
    },

    /// The user interacted with a notification
    NotificationClicked {
        timestamp: DateTime<Utc>,
        id: String,
        action: Option<String>,
        category: Option<String>,
    },
}

impl WorkerEvent {
    /// Fold this event into the usage log
    pub fn record(&self, log: &mut UsageLog) {
        match self {
            WorkerEvent::StateChanged { .. } => {}
            WorkerEvent::Installed { cache, .. } => {
                // First install of any worker version is the app install
                log.track_install();
                log.track_event("sw", "installed", Some(cache));
            }
            WorkerEvent::Activated { .. } => log.track_event("sw", "activated", None),
            WorkerEvent::Connectivity { online, .. } => log.set_online(*online),
            WorkerEvent::OfflineServed { .. } => log.track_offline_usage(),
            WorkerEvent::NotificationShown { category, .. } => {
                log.track_notification(NotificationAction::Receive, category.as_deref())
            }
            WorkerEvent::NotificationSuppressed { category, .. } => {
                log.track_event("notification", "suppressed", category.as_deref())
            }
            WorkerEvent::NotificationClicked { category, .. } => {
                log.track_notification(NotificationAction::Click, category.as_deref())
            }
        }
    }
}

/// Worker-side handle for reporting events
///
/// Sends never block: if the app side is slow or gone the event is dropped.
#[derive(Clone)]
pub struct EventReporter {
    tx: Option<mpsc::Sender<WorkerEvent>>,
}

impl EventReporter {
    pub fn new(tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Reporter that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, event: WorkerEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::debug!("Dropped worker event: {}", e);
        }
    }
}
