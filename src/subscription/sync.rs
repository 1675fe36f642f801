//! Telling the campaign API about subscriptions
//!
//! Both calls are best-effort from the controller's point of view. The
//! server is expected to reconcile endpoints it never heard about.

use super::platform::PushSubscription;
use crate::http::{HttpClient, HttpError};
use async_trait::async_trait;
use serde::Serialize;

pub const SUBSCRIBE_PATH: &str = "/push/subscribe";
pub const UNSUBSCRIBE_PATH: &str = "/push/unsubscribe";

/// Whether the remote server heard about a subscription change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Synced,
    Failed,
}

#[async_trait]
pub trait SubscriptionSync: Send + Sync {
    async fn register(&self, subscription: &PushSubscription) -> Result<(), HttpError>;

    async fn unregister(&self, endpoint: &str) -> Result<(), HttpError>;
}

#[derive(Serialize)]
struct UnsubscribeBody<'a> {
    endpoint: &'a str,
}

/// Sync over the campaign API
pub struct HttpSubscriptionSync {
    client: HttpClient,
}

impl HttpSubscriptionSync {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubscriptionSync for HttpSubscriptionSync {
    async fn register(&self, subscription: &PushSubscription) -> Result<(), HttpError> {
        // Body is {endpoint, keys: {p256dh, auth}}
        self.client.post_json(SUBSCRIBE_PATH, subscription).await?;
        Ok(())
    }

    async fn unregister(&self, endpoint: &str) -> Result<(), HttpError> {
        self.client
            .post_json(UNSUBSCRIBE_PATH, &UnsubscribeBody { endpoint })
            .await?;
        Ok(())
    }
}
