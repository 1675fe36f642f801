//! Push notification gateway
//!
//! Turns inbound push payloads into displayed notifications and routes clicks.
//! Nothing here returns an error to the caller: a push handler that fails
//! loudly gets the worker penalized, so every failure is logged and reported
//! as an outcome instead.

use super::filter::NotificationFilter;
use super::notifier::{Notifier, WindowOpener};
use crate::clock::{Clock, SharedClock};
use crate::events::{EventReporter, WorkerEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

pub const NOTIFICATION_ICON: &str = "/icons/icon-192x192.png";
pub const NOTIFICATION_BADGE: &str = "/icons/icon-72x72.png";
pub const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];
/// The one action button every notification carries
pub const VIEW_ACTION: &str = "view";

// ─────────────────────────────────────────────────────────────────────────────
// Payload and descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Inbound push payload
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionButton {
    pub action: String,
    pub title: String,
}

/// Everything needed to display one notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDescriptor {
    pub id: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<ActionButton>,
}

impl NotificationDescriptor {
    pub fn new(
        id: String,
        title: &str,
        body: &str,
        url: &str,
        category: Option<String>,
    ) -> Self {
        Self {
            id,
            title: title.to_string(),
            body: body.to_string(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_BADGE.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            data: NotificationData {
                url: url.to_string(),
                category,
            },
            actions: vec![ActionButton {
                action: VIEW_ACTION.to_string(),
                title: "View Details".to_string(),
            }],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// No payload
    Ignored,
    /// Payload was not valid JSON `{title, body, url?}`
    Malformed,
    /// Dropped by the preference filter
    Suppressed,
    Shown { id: String },
    /// Display failed
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    /// Closed without opening anything
    Closed,
    Opened { url: String },
    /// No such notification is displayed
    Unknown,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────────────────

pub struct PushGateway {
    notifier: Arc<dyn Notifier>,
    opener: Arc<dyn WindowOpener>,
    filter: NotificationFilter,
    origin: Url,
    events: EventReporter,
    clock: SharedClock,
    next_id: AtomicU64,
}

impl PushGateway {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        opener: Arc<dyn WindowOpener>,
        filter: NotificationFilter,
        origin: Url,
        events: EventReporter,
        clock: SharedClock,
    ) -> Self {
        Self {
            notifier,
            opener,
            filter,
            origin,
            events,
            clock,
            next_id: AtomicU64::new(1),
        }
    }

    /// Handle a push event
    pub fn on_push(&self, payload: Option<&[u8]>) -> PushOutcome {
        let Some(payload) = payload.filter(|p| !p.is_empty()) else {
            tracing::debug!("Push without payload ignored");
            return PushOutcome::Ignored;
        };

        let payload: PushPayload = match serde_json::from_slice(payload) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Malformed push payload: {}", e);
                return PushOutcome::Malformed;
            }
        };

        let category = payload.category.as_deref();
        if !self.filter.allows(category) {
            tracing::info!(category, "Push suppressed by notification preferences");
            self.events.report(WorkerEvent::NotificationSuppressed {
                timestamp: self.clock.now(),
                category: payload.category.clone(),
            });
            return PushOutcome::Suppressed;
        }

        let url = payload.url.as_deref().unwrap_or("/");
        match self.show(&payload.title, &payload.body, url, payload.category.clone()) {
            Some(id) => PushOutcome::Shown { id },
            None => PushOutcome::Failed,
        }
    }

    /// Display a notification directly, bypassing the push filter
    ///
    /// Returns the notification id, or `None` if display failed.
    pub fn show(&self, title: &str, body: &str, url: &str, category: Option<String>) -> Option<String> {
        let id = self.mint_id();
        let descriptor = NotificationDescriptor::new(id.clone(), title, body, url, category.clone());
        if let Err(e) = self.notifier.show(descriptor) {
            tracing::error!("Failed to display notification: {}", e);
            return None;
        }
        self.events.report(WorkerEvent::NotificationShown {
            timestamp: self.clock.now(),
            id: id.clone(),
            category,
        });
        Some(id)
    }

    /// Handle a notification click; always closes the notification first
    pub async fn on_notification_click(&self, id: &str, action: Option<&str>) -> ClickOutcome {
        let Some(notification) = self.notifier.close(id) else {
            tracing::debug!(id, "Click for a notification that is not displayed");
            return ClickOutcome::Unknown;
        };

        self.events.report(WorkerEvent::NotificationClicked {
            timestamp: self.clock.now(),
            id: id.to_string(),
            action: action.map(str::to_string),
            category: notification.data.category.clone(),
        });

        if action != Some(VIEW_ACTION) {
            return ClickOutcome::Closed;
        }

        let target = match self.origin.join(&notification.data.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(url = %notification.data.url, "Bad notification URL: {}", e);
                return ClickOutcome::Closed;
            }
        };
        if let Err(e) = self.opener.open(&target).await {
            tracing::error!(url = %target, "Failed to open window: {:#}", e);
            return ClickOutcome::Closed;
        }
        ClickOutcome::Opened {
            url: target.to_string(),
        }
    }

    pub fn displayed(&self) -> Vec<NotificationDescriptor> {
        self.notifier.displayed()
    }

    fn mint_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stamp: DateTime<Utc> = self.clock.now();
        format!("{}-{}", stamp.timestamp_millis(), n)
    }
}
