//! Push subscription controller
//!
//! Bridges the UI, the permission prompt and the push manager, and is the only
//! component that talks to the campaign API. Only conditions that make an
//! operation meaningless (no push support, permission refused) come back as
//! errors; server sync problems are logged and reported as [`SyncOutcome`].

pub mod platform;
pub mod sync;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub use platform::{
    LocalPushPlatform, Permission, PermissionPolicy, PlatformError, PushPlatform, PushSubscription,
};
pub use sync::{HttpSubscriptionSync, SubscriptionSync, SyncOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("push notifications are not supported here")]
    NotSupported,

    #[error("notification permission was not granted")]
    PermissionDenied,

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Result of a successful subscribe
#[derive(Debug, Clone, Serialize)]
pub struct Subscribed {
    pub subscription: PushSubscription,
    pub sync: SyncOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub is_subscribed: bool,
    pub supported: bool,
}

pub struct SubscriptionController {
    platform: Arc<dyn PushPlatform>,
    sync: Arc<dyn SubscriptionSync>,
    public_key: String,
    permission_timeout: Option<Duration>,
}

impl SubscriptionController {
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        sync: Arc<dyn SubscriptionSync>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            sync,
            public_key: public_key.into(),
            permission_timeout: None,
        }
    }

    /// Treat a permission prompt that is not answered in time as a denial
    pub fn with_permission_timeout(mut self, timeout: Duration) -> Self {
        self.permission_timeout = Some(timeout);
        self
    }

    /// Ensure a push subscription exists and tell the server about it
    pub async fn subscribe(&self) -> Result<Subscribed, SubscriptionError> {
        if !self.platform.capabilities().push_supported() {
            return Err(SubscriptionError::NotSupported);
        }

        if self.request_permission().await? != Permission::Granted {
            return Err(SubscriptionError::PermissionDenied);
        }

        let subscription = match self.platform.get_subscription().await? {
            Some(existing) => {
                tracing::debug!(endpoint = %existing.endpoint, "Reusing existing subscription");
                existing
            }
            None => self.platform.subscribe(&self.public_key).await?,
        };

        let sync = match self.sync.register(&subscription).await {
            Ok(()) => SyncOutcome::Synced,
            Err(e) => {
                tracing::warn!("Subscription kept locally, server sync failed: {}", e);
                SyncOutcome::Failed
            }
        };

        Ok(Subscribed { subscription, sync })
    }

    /// Remove the subscription; server notification is best-effort
    ///
    /// Returns `true` whether or not a subscription existed.
    pub async fn unsubscribe(&self) -> Result<bool, SubscriptionError> {
        let Some(subscription) = self.platform.get_subscription().await? else {
            tracing::debug!("No subscription to remove");
            return Ok(true);
        };

        if let Err(e) = self.sync.unregister(&subscription.endpoint).await {
            tracing::warn!("Server unsubscribe failed, removing locally anyway: {}", e);
        }
        self.platform.unsubscribe(&subscription).await?;
        tracing::info!(endpoint = %subscription.endpoint, "Unsubscribed from push");
        Ok(true)
    }

    /// Never fails; internal errors read as "supported but not subscribed"
    pub async fn check_status(&self) -> SubscriptionStatus {
        if !self.platform.capabilities().push_supported() {
            return SubscriptionStatus {
                is_subscribed: false,
                supported: false,
            };
        }
        match self.platform.get_subscription().await {
            Ok(subscription) => SubscriptionStatus {
                is_subscribed: subscription.is_some(),
                supported: true,
            },
            Err(e) => {
                tracing::warn!("Could not read subscription status: {}", e);
                SubscriptionStatus {
                    is_subscribed: false,
                    supported: true,
                }
            }
        }
    }

    /// Show a notification through the worker without a push round-trip
    pub async fn send_test_notification(&self, title: &str, body: &str) -> Result<(), SubscriptionError> {
        if self.platform.permission() != Permission::Granted {
            return Err(SubscriptionError::PermissionDenied);
        }
        self.platform.show_notification(title, body).await?;
        Ok(())
    }

    async fn request_permission(&self) -> Result<Permission, SubscriptionError> {
        let request = self.platform.request_permission();
        let Some(timeout) = self.permission_timeout else {
            return Ok(request.await?);
        };
        match tokio::time::timeout(timeout, request).await {
            Ok(permission) => Ok(permission?),
            Err(_) => {
                // A late answer is ignored
                tracing::warn!(?timeout, "Permission prompt timed out, treating as denied");
                Ok(Permission::Denied)
            }
        }
    }
}
