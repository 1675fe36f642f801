// Server module - the worker's HTTP surface
//
// One axum router carries both sides of the process:
// - /__sw/*  : events a browser would deliver to the service worker
//              (push, notification clicks) plus worker introspection
// - /__app/* : read-only JSON views of the app-side stores
// - anything else is a fetch, answered by the worker's cache strategy

mod error;
mod handlers;
mod intercept;

pub use error::ApiError;

use crate::analytics::UsageLog;
use crate::preferences::PreferenceStore;
use crate::worker::ServiceWorker;
use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const PUSH_PATH: &str = "/__sw/push";
pub const NOTIFICATION_CLICK_PATH: &str = "/__sw/notificationclick";
pub const NOTIFY_PATH: &str = "/__sw/notify";
pub const RELOAD_PREFERENCES_PATH: &str = "/__app/preferences/reload";

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<ServiceWorker>,
    pub preferences: Arc<Mutex<PreferenceStore>>,
    pub analytics: Arc<Mutex<UsageLog>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PUSH_PATH, post(handlers::push))
        .route(NOTIFICATION_CLICK_PATH, post(handlers::notification_click))
        .route(NOTIFY_PATH, post(handlers::notify))
        .route("/__sw/notifications", get(handlers::notifications))
        .route("/__sw/state", get(handlers::worker_state))
        .route("/__app/preferences", get(handlers::preferences))
        .route(RELOAD_PREFERENCES_PATH, post(handlers::reload_preferences))
        .route("/__app/stats", get(handlers::stats))
        // Fetch interception (catch-all)
        .fallback(intercept::intercept)
        .with_state(state)
}

/// Bind and serve until `shutdown_rx` fires
pub async fn start_server(
    bind_addr: SocketAddr,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;

    tracing::info!("Worker listening on {}", bind_addr);
    serve(listener, state, shutdown_rx).await
}

async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::handlers::{NotifyResponse, ReloadResponse, WorkerStatus};
    use super::*;
    use crate::clock::test_support::{local, FixedClock};
    use crate::clock::SharedClock;
    use crate::events::EventReporter;
    use crate::storage::{MemoryStore, SharedStore};
    use crate::worker::cache::CacheStorage;
    use crate::worker::fetch::test_support::StubFetcher;
    use crate::worker::filter::NotificationFilter;
    use crate::worker::notifier::test_support::RecordingOpener;
    use crate::worker::notifier::NotificationTray;
    use crate::worker::{PushGateway, WorkerSettings, WorkerState};
    use serde_json::Value;
    use tempfile::TempDir;
    use url::Url;

    const ORIGIN: &str = "https://campaign.example";

    struct Running {
        base: String,
        client: reqwest::Client,
        worker: Arc<ServiceWorker>,
        preferences: Arc<Mutex<PreferenceStore>>,
        backend: SharedStore,
        clock: SharedClock,
        fetcher: Arc<StubFetcher>,
        opener: Arc<RecordingOpener>,
        _shutdown: tokio::sync::oneshot::Sender<()>,
        _dir: TempDir,
    }

    impl Running {
        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        async fn get_json(&self, path: &str) -> Value {
            let response = self.client.get(self.url(path)).send().await.unwrap();
            assert!(response.status().is_success(), "GET {path}");
            response.json().await.unwrap()
        }
    }

    async fn running() -> Running {
        let dir = TempDir::new().unwrap();
        let clock: SharedClock = FixedClock::at(local(2026, 6, 15, 12, 0));
        let backend: SharedStore = Arc::new(MemoryStore::new());
        let origin = Url::parse(ORIGIN).unwrap();

        let fetcher = Arc::new(StubFetcher::new());
        fetcher.route(&format!("{ORIGIN}/"), 200, "<h1>home</h1>");
        fetcher.route(&format!("{ORIGIN}/offline.html"), 200, "<h1>offline</h1>");

        let preferences = PreferenceStore::load(backend.clone(), clock.clone());
        let filter = NotificationFilter::new(preferences.subscribe(), clock.clone());
        let analytics = UsageLog::new(backend.clone(), clock.clone(), true);

        let opener = Arc::new(RecordingOpener::default());
        let push = PushGateway::new(
            Arc::new(NotificationTray::default()),
            opener.clone(),
            filter,
            origin.clone(),
            EventReporter::disabled(),
            clock.clone(),
        );
        let worker = Arc::new(ServiceWorker::new(
            WorkerSettings {
                origin,
                cache_name: "herald-test".into(),
                precache: vec!["/".into(), "/offline.html".into()],
                offline_page: "/offline.html".into(),
            },
            CacheStorage::new(dir.path().join("caches")),
            fetcher.clone(),
            push,
            EventReporter::disabled(),
            clock.clone(),
        ));

        let preferences = Arc::new(Mutex::new(preferences));
        let state = AppState {
            worker: worker.clone(),
            preferences: preferences.clone(),
            analytics: Arc::new(Mutex::new(analytics)),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(serve(listener, state, shutdown_rx));

        Running {
            base,
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
            worker,
            preferences,
            backend,
            clock,
            fetcher,
            opener,
            _shutdown: shutdown,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_fetch_is_network_first_once_activated() {
        let app = running().await;

        let status: WorkerStatus =
            serde_json::from_value(app.get_json("/__sw/state").await).unwrap();
        assert_eq!(status.state, WorkerState::Parsed);

        app.worker.start().await.unwrap();
        let status: WorkerStatus =
            serde_json::from_value(app.get_json("/__sw/state").await).unwrap();
        assert_eq!(status.state, WorkerState::Activated);
        assert_eq!(status.precache, 2);

        let online = app.client.get(app.url("/")).send().await.unwrap();
        assert_eq!(online.text().await.unwrap(), "<h1>home</h1>");

        app.fetcher.set_offline(true);
        let cached = app.client.get(app.url("/")).send().await.unwrap();
        assert_eq!(cached.status(), 200);
        assert_eq!(cached.text().await.unwrap(), "<h1>home</h1>");

        let fallback = app
            .client
            .get(app.url("/volunteer"))
            .header("accept", "text/html")
            .send()
            .await
            .unwrap();
        assert_eq!(fallback.text().await.unwrap(), "<h1>offline</h1>");

        let asset = app.client.get(app.url("/app.js")).send().await.unwrap();
        assert_eq!(asset.status(), 408);
    }

    #[tokio::test]
    async fn test_push_then_view_click_opens_url() {
        let app = running().await;

        let outcome: Value = app
            .client
            .post(app.url(PUSH_PATH))
            .body(r#"{"title":"Rally","body":"Saturday 10am","url":"/events/rally","category":"events"}"#)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(outcome["outcome"], "shown");
        let id = outcome["id"].as_str().unwrap().to_string();

        let shown = app.get_json("/__sw/notifications").await;
        assert_eq!(shown.as_array().unwrap().len(), 1);

        let click: Value = app
            .client
            .post(app.url(NOTIFICATION_CLICK_PATH))
            .json(&serde_json::json!({ "id": id, "action": "view" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(click["outcome"], "opened");
        assert_eq!(
            *app.opener.opened.lock().unwrap(),
            vec!["https://campaign.example/events/rally".to_string()]
        );

        // Closed by the first click
        let again = app
            .client
            .post(app.url(NOTIFICATION_CLICK_PATH))
            .json(&serde_json::json!({ "id": id, "action": "view" }))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 404);
    }

    #[tokio::test]
    async fn test_push_respects_preferences_and_empty_payloads() {
        let app = running().await;
        app.preferences
            .lock()
            .unwrap()
            .update_category("news", false);

        let suppressed: Value = app
            .client
            .post(app.url(PUSH_PATH))
            .body(r#"{"title":"Press","body":"Statement","category":"news"}"#)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(suppressed["outcome"], "suppressed");

        let ignored: Value = app
            .client
            .post(app.url(PUSH_PATH))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(ignored["outcome"], "ignored");

        let malformed: Value = app
            .client
            .post(app.url(PUSH_PATH))
            .body("not json")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(malformed["outcome"], "malformed");
        assert!(app.get_json("/__sw/notifications").await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notify_bypasses_filter_and_validates_title() {
        let app = running().await;
        app.preferences
            .lock()
            .unwrap()
            .update_quiet_hours(true, Some("00:00"), Some("23:59"))
            .unwrap();

        let response: NotifyResponse = app
            .client
            .post(app.url(NOTIFY_PATH))
            .json(&serde_json::json!({ "title": "Test", "body": "Hello" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(!response.id.is_empty());

        let blank = app
            .client
            .post(app.url(NOTIFY_PATH))
            .json(&serde_json::json!({ "title": " ", "body": "Hello" }))
            .send()
            .await
            .unwrap();
        assert_eq!(blank.status(), 400);
    }

    #[tokio::test]
    async fn test_app_views_and_reload() {
        let app = running().await;

        let stats = app.get_json("/__app/stats").await;
        assert_eq!(stats["totalSessions"], 1);

        let prefs = app.get_json("/__app/preferences").await;
        assert_eq!(prefs["categories"]["events"]["enabled"], true);

        // Another process edits the stored preferences
        let mut other = PreferenceStore::load(app.backend.clone(), app.clock.clone());
        other.update_category("events", false);

        let reload: ReloadResponse = app
            .client
            .post(app.url(RELOAD_PREFERENCES_PATH))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(reload.changed);

        let prefs = app.get_json("/__app/preferences").await;
        assert_eq!(prefs["categories"]["events"]["enabled"], false);
    }
}
