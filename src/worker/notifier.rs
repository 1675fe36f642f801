//! Notification display and window opening
//!
//! Stand-ins for the platform's notification center and `clients.openWindow`.
//! The tray keeps what is currently displayed so it can be listed and closed;
//! the opener hands URLs to a desktop command.

use super::push::NotificationDescriptor;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification tray unavailable")]
    Unavailable,
}

pub trait Notifier: Send + Sync {
    fn show(&self, notification: NotificationDescriptor) -> Result<(), NotifyError>;

    /// Remove a displayed notification, returning it if it was there
    fn close(&self, id: &str) -> Option<NotificationDescriptor>;

    fn displayed(&self) -> Vec<NotificationDescriptor>;
}

/// In-memory notification center
///
/// Holds at most `capacity` notifications; the oldest is dropped when full.
pub struct NotificationTray {
    shown: Mutex<VecDeque<NotificationDescriptor>>,
    capacity: usize,
}

impl NotificationTray {
    pub fn new(capacity: usize) -> Self {
        Self {
            shown: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for NotificationTray {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Notifier for NotificationTray {
    fn show(&self, notification: NotificationDescriptor) -> Result<(), NotifyError> {
        let mut shown = self.shown.lock().map_err(|_| NotifyError::Unavailable)?;
        tracing::info!(
            id = %notification.id,
            title = %notification.title,
            "Notification: {}",
            notification.body
        );
        if shown.len() >= self.capacity {
            shown.pop_front();
        }
        shown.push_back(notification);
        Ok(())
    }

    fn close(&self, id: &str) -> Option<NotificationDescriptor> {
        let mut shown = self.shown.lock().ok()?;
        let index = shown.iter().position(|n| n.id == id)?;
        shown.remove(index)
    }

    fn displayed(&self) -> Vec<NotificationDescriptor> {
        match self.shown.lock() {
            Ok(shown) => shown.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Window opening
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait WindowOpener: Send + Sync {
    async fn open(&self, url: &Url) -> anyhow::Result<()>;
}

/// Opens URLs with an external command (e.g. `xdg-open`), or only logs them
pub struct CommandOpener {
    command: Option<String>,
}

impl CommandOpener {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }
}

#[async_trait]
impl WindowOpener for CommandOpener {
    async fn open(&self, url: &Url) -> anyhow::Result<()> {
        let Some(command) = &self.command else {
            tracing::info!(%url, "Open window (no opener configured)");
            return Ok(());
        };

        // First word is the program, the rest are leading arguments
        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default();
        let status = tokio::process::Command::new(program)
            .args(parts)
            .arg(url.as_str())
            .status()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run '{}': {}", command, e))?;

        if !status.success() {
            anyhow::bail!("'{}' exited with {}", command, status);
        }
        tracing::debug!(%url, "Window opened");
        Ok(())
    }
}
