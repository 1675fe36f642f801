//! Push platform seam
//!
//! Everything the subscription controller needs from the host: capability
//! detection, the permission prompt, the push manager and direct notification
//! display. [`LocalPushPlatform`] is the implementation herald ships with; it
//! keeps the subscription in the key-value store and displays test
//! notifications through the running daemon.

use crate::clock::{Clock, SharedClock};
use crate::http::HttpClient;
use crate::server;
use crate::storage::{self, SharedStore, PERMISSION_KEY, SUBSCRIPTION_KEY};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Not asked yet
    Default,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub service_worker: bool,
    pub push_manager: bool,
}

impl Capabilities {
    pub fn push_supported(&self) -> bool {
        self.service_worker && self.push_manager
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Credential a push server uses to address this installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

/// Unexpected failure inside a platform API
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    #[error("platform storage failed: {0}")]
    Storage(String),
}

#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Current permission without prompting
    fn permission(&self) -> Permission;

    /// Prompt for permission; may wait on a human indefinitely
    async fn request_permission(&self) -> Result<Permission, PlatformError>;

    async fn get_subscription(&self) -> Result<Option<PushSubscription>, PlatformError>;

    async fn subscribe(&self, application_server_key: &str) -> Result<PushSubscription, PlatformError>;

    async fn unsubscribe(&self, subscription: &PushSubscription) -> Result<bool, PlatformError>;

    /// Display a notification directly through the active worker
    async fn show_notification(&self, title: &str, body: &str) -> Result<(), PlatformError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Local platform
// ─────────────────────────────────────────────────────────────────────────────

/// How the local platform answers permission requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    Granted,
    Denied,
    /// Ask on the terminal, remember the answer
    Prompt,
}

impl PermissionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "granted" => Some(Self::Granted),
            "denied" => Some(Self::Denied),
            "prompt" => Some(Self::Prompt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Prompt => "prompt",
        }
    }
}

pub struct LocalPushPlatform {
    store: SharedStore,
    clock: SharedClock,
    policy: PermissionPolicy,
    enabled: bool,
    /// Client rooted at the running daemon
    daemon: HttpClient,
}

impl LocalPushPlatform {
    pub fn new(
        store: SharedStore,
        clock: SharedClock,
        policy: PermissionPolicy,
        enabled: bool,
        daemon: HttpClient,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            enabled,
            daemon,
        }
    }

    fn stored_permission(&self) -> Permission {
        storage::load_json(self.store.as_ref(), PERMISSION_KEY).unwrap_or(Permission::Default)
    }

    fn remember(&self, permission: Permission) -> Result<(), PlatformError> {
        storage::save_json(self.store.as_ref(), PERMISSION_KEY, &permission)
            .map_err(|e| PlatformError::Storage(format!("{e:#}")))
    }

    /// Endpoint and key material derived from the server key and the current time
    fn mint(&self, application_server_key: &str) -> Result<PushSubscription, PlatformError> {
        let now = self.clock.now();
        let nanos = now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes();
        let pid = std::process::id().to_le_bytes();
        let seed = digest(&[application_server_key.as_bytes(), nanos.as_slice(), pid.as_slice()]);
        let token_hash = digest(&[b"endpoint".as_slice(), seed.as_bytes()]);
        let token = &token_hash[..32];
        let mut endpoint = self
            .daemon
            .url_for(server::PUSH_PATH)
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;
        endpoint.query_pairs_mut().append_pair("subscription", token);

        Ok(PushSubscription {
            endpoint: endpoint.to_string(),
            keys: SubscriptionKeys {
                p256dh: digest(&[b"p256dh".as_slice(), seed.as_bytes()]),
                auth: digest(&[b"auth".as_slice(), seed.as_bytes()])[..32].to_string(),
            },
        })
    }
}

fn digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    format!("{:x}", hasher.finalize())
}

/// Blocking yes/no question on the terminal
fn ask_on_terminal() -> std::io::Result<bool> {
    let mut stdout = std::io::stdout();
    write!(stdout, "Allow herald to show notifications? [y/N] ")?;
    stdout.flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[async_trait]
impl PushPlatform for LocalPushPlatform {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            service_worker: true,
            push_manager: self.enabled,
        }
    }

    fn permission(&self) -> Permission {
        match self.policy {
            PermissionPolicy::Granted => Permission::Granted,
            PermissionPolicy::Denied => Permission::Denied,
            PermissionPolicy::Prompt => self.stored_permission(),
        }
    }

    async fn request_permission(&self) -> Result<Permission, PlatformError> {
        let current = self.permission();
        if current != Permission::Default {
            return Ok(current);
        }

        let allowed = tokio::task::spawn_blocking(ask_on_terminal)
            .await
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?
            .map_err(|e| PlatformError::Unavailable(format!("terminal prompt failed: {e}")))?;
        let permission = if allowed {
            Permission::Granted
        } else {
            Permission::Denied
        };
        self.remember(permission)?;
        Ok(permission)
    }

    async fn get_subscription(&self) -> Result<Option<PushSubscription>, PlatformError> {
        Ok(storage::load_json(self.store.as_ref(), SUBSCRIPTION_KEY))
    }

    async fn subscribe(&self, application_server_key: &str) -> Result<PushSubscription, PlatformError> {
        let subscription = self.mint(application_server_key)?;
        storage::save_json(self.store.as_ref(), SUBSCRIPTION_KEY, &subscription)
            .map_err(|e| PlatformError::Storage(format!("{e:#}")))?;
        tracing::info!(endpoint = %subscription.endpoint, "Push subscription created");
        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &PushSubscription) -> Result<bool, PlatformError> {
        let current: Option<PushSubscription> =
            storage::load_json(self.store.as_ref(), SUBSCRIPTION_KEY);
        if current.as_ref() != Some(subscription) {
            return Ok(false);
        }
        self.store
            .remove(SUBSCRIPTION_KEY)
            .map_err(|e| PlatformError::Storage(format!("{e:#}")))?;
        Ok(true)
    }

    async fn show_notification(&self, title: &str, body: &str) -> Result<(), PlatformError> {
        let payload = serde_json::json!({ "title": title, "body": body });
        self.daemon
            .post_json(server::NOTIFY_PATH, &payload)
            .await
            .map_err(|e| PlatformError::Unavailable(format!("is `herald serve` running? {e}")))?;
        Ok(())
    }
}
