// Service worker - cache lifecycle and push handling
//
// One worker per process. Lifecycle:
//
//   Parsed → Installing → Installed → Activating → Activated
//                 ↓
//             Redundant  (install failed; a retry starts over at Installing)
//
// Install precaches the asset manifest all-or-nothing and skips waiting.
// Activate drops every cache that is not the current version, then claims
// clients. Until the worker is activated, fetches pass straight through to
// the network.

pub mod cache;
pub mod fetch;
pub mod filter;
pub mod notifier;
pub mod push;
pub mod strategy;

use crate::clock::{Clock, SharedClock};
use crate::events::{EventReporter, WorkerEvent};
use anyhow::{bail, Context, Result};
use cache::{Cache, CacheStorage};
use fetch::{FetchRequest, FetchResponse, Fetcher};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub use push::PushGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

/// What the worker caches and where it fetches from
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Site the worker serves; only same-origin requests are intercepted
    pub origin: Url,
    /// Version-tagged cache name; changing it invalidates older caches
    pub cache_name: String,
    /// Paths fetched and stored at install
    pub precache: Vec<String>,
    /// Path of the offline fallback document; always precached
    pub offline_page: String,
}

pub struct ServiceWorker {
    settings: WorkerSettings,
    caches: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    push: PushGateway,
    events: EventReporter,
    clock: SharedClock,
    state: Mutex<WorkerState>,
    cache: Mutex<Option<Cache>>,
    online: AtomicBool,
}

impl ServiceWorker {
    pub fn new(
        settings: WorkerSettings,
        caches: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
        push: PushGateway,
        events: EventReporter,
        clock: SharedClock,
    ) -> Self {
        Self {
            settings,
            caches,
            fetcher,
            push,
            events,
            clock,
            state: Mutex::new(WorkerState::Parsed),
            cache: Mutex::new(None),
            online: AtomicBool::new(true),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(WorkerState::Redundant)
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn push(&self) -> &PushGateway {
        &self.push
    }

    /// Install then activate
    pub async fn start(&self) -> Result<()> {
        self.install().await?;
        self.activate().await
    }

    /// Keep trying to install until the worker is active
    ///
    /// An unreachable origin at startup leaves the worker `Redundant`; fetches
    /// pass through meanwhile and the next attempt starts after `retry`.
    pub async fn run_lifecycle(&self, retry: Duration) {
        loop {
            match self.start().await {
                Ok(()) => return,
                Err(e) => tracing::warn!(
                    "Service worker install failed, retrying in {}s: {:#}",
                    retry.as_secs_f32(),
                    e
                ),
            }
            tokio::time::sleep(retry).await;
        }
    }

    /// Precache the asset manifest plus the offline page
    ///
    /// Every asset must fetch with a 2xx or nothing is stored. On failure the
    /// worker becomes `Redundant` and the caller may retry.
    pub async fn install(&self) -> Result<()> {
        match self.state() {
            WorkerState::Parsed | WorkerState::Redundant => {}
            other => bail!("Cannot install from state {:?}", other),
        }
        self.transition(WorkerState::Installing);

        match self.precache().await {
            Ok(count) => {
                // Skip waiting: nothing to wait for, go straight to installed
                self.transition(WorkerState::Installed);
                tracing::info!(
                    cache = %self.settings.cache_name,
                    assets = count,
                    "Service worker installed"
                );
                self.events.report(WorkerEvent::Installed {
                    timestamp: self.clock.now(),
                    cache: self.settings.cache_name.clone(),
                    assets: count,
                });
                Ok(())
            }
            Err(e) => {
                self.transition(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Drop stale caches and take control of clients
    pub async fn activate(&self) -> Result<()> {
        if self.state() != WorkerState::Installed {
            bail!("Cannot activate from state {:?}", self.state());
        }
        self.transition(WorkerState::Activating);

        let mut evicted = Vec::new();
        let names = match self.caches.keys().await {
            Ok(names) => names,
            Err(e) => {
                // Stale caches stay around until the next activation
                tracing::warn!("Could not list caches: {}", e);
                Vec::new()
            }
        };
        for name in names {
            if name == self.settings.cache_name {
                continue;
            }
            match self.caches.delete(&name).await {
                Ok(_) => {
                    tracing::info!(cache = %name, "Deleted stale cache");
                    evicted.push(name);
                }
                Err(e) => tracing::warn!(cache = %name, "Failed to delete stale cache: {}", e),
            }
        }

        // Claim clients: from here on every fetch goes through the strategy
        self.transition(WorkerState::Activated);
        tracing::info!(cache = %self.settings.cache_name, "Service worker activated");
        self.events.report(WorkerEvent::Activated {
            timestamp: self.clock.now(),
            cache: self.settings.cache_name.clone(),
            evicted,
        });
        Ok(())
    }

    /// Answer a request; always produces a response
    pub async fn handle_fetch(&self, request: FetchRequest) -> FetchResponse {
        let cache = self.active_cache();
        let Some(cache) = cache.filter(|_| self.state() == WorkerState::Activated) else {
            return strategy::passthrough(self.fetcher.as_ref(), &request).await;
        };
        if !request.is_same_origin(&self.settings.origin) {
            return strategy::passthrough(self.fetcher.as_ref(), &request).await;
        }

        let offline_page = self.url_for(&self.settings.offline_page);
        let served = strategy::network_first(
            self.fetcher.as_ref(),
            &cache,
            offline_page.as_str(),
            &request,
        )
        .await;

        self.set_online(served.source == strategy::Source::Network);
        if served.source.is_offline() {
            self.events.report(WorkerEvent::OfflineServed {
                timestamp: self.clock.now(),
                path: request.url.path().to_string(),
                fallback: served.source == strategy::Source::OfflinePage,
            });
        }
        served.response
    }

    /// Absolute URL for a same-origin path
    pub fn url_for(&self, path: &str) -> Url {
        self.settings
            .origin
            .join(path)
            .unwrap_or_else(|_| self.settings.origin.clone())
    }

    async fn precache(&self) -> Result<usize> {
        let cache = self
            .caches
            .open(&self.settings.cache_name)
            .await
            .context("Failed to open cache")?;

        let mut requests: Vec<FetchRequest> = self
            .settings
            .precache
            .iter()
            .map(|path| FetchRequest::get(self.url_for(path)))
            .collect();
        let offline_page = self.url_for(&self.settings.offline_page);
        if !requests.iter().any(|r| r.url == offline_page) {
            tracing::debug!(%offline_page, "Offline page not in precache list, adding it");
            requests.push(FetchRequest::get(offline_page));
        }

        // Fetch everything first so a single failure stores nothing
        let responses = futures::future::try_join_all(requests.iter().map(|request| async move {
            let response = self
                .fetcher
                .fetch(request)
                .await
                .with_context(|| format!("Failed to fetch {}", request.url))?;
            if !response.is_success() {
                bail!("Precache of {} returned {}", request.url, response.status);
            }
            Ok::<_, anyhow::Error>(response)
        }))
        .await?;

        for (stored, (request, response)) in requests.iter().zip(&responses).enumerate() {
            if let Err(e) = cache.put(request, response).await {
                // Undo only this install's writes; runtime entries stay
                for written in &requests[..stored] {
                    if let Err(cleanup) = cache.delete(written).await {
                        tracing::warn!(url = %written.url, "Failed to remove precached asset: {}", cleanup);
                    }
                }
                return Err(e).context("Failed to store precached asset");
            }
        }

        if let Ok(mut slot) = self.cache.lock() {
            *slot = Some(cache);
        }
        Ok(requests.len())
    }

    fn active_cache(&self) -> Option<Cache> {
        self.cache.lock().ok().and_then(|c| c.clone())
    }

    fn transition(&self, next: WorkerState) {
        if let Ok(mut state) = self.state.lock() {
            tracing::debug!(from = ?*state, to = ?next, "Worker state");
            *state = next;
        }
        self.events.report(WorkerEvent::StateChanged {
            timestamp: self.clock.now(),
            state: next,
        });
    }

    fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::Relaxed) != online {
            self.events.report(WorkerEvent::Connectivity {
                timestamp: self.clock.now(),
                online,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::{local, FixedClock};
    use crate::worker::fetch::test_support::StubFetcher;
    use crate::worker::filter::NotificationFilter;
    use crate::worker::notifier::{CommandOpener, NotificationTray};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    const ORIGIN: &str = "https://campaign.example";

    struct Harness {
        worker: ServiceWorker,
        fetcher: Arc<StubFetcher>,
        events: mpsc::Receiver<WorkerEvent>,
        _dir: TempDir,
    }

    fn origin(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let clock: SharedClock = FixedClock::at(local(2026, 6, 15, 12, 0));
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.route(origin("/").as_str(), 200, "<h1>home</h1>");
        fetcher.route(origin("/offline.html").as_str(), 200, "<h1>offline</h1>");
        fetcher.route(origin("/manifest.json").as_str(), 200, "{}");

        let (tx, events) = mpsc::channel(64);
        let reporter = EventReporter::new(tx);
        let push = PushGateway::new(
            Arc::new(NotificationTray::default()),
            Arc::new(CommandOpener::new(None)),
            NotificationFilter::allow_all(clock.clone()),
            Url::parse(ORIGIN).unwrap(),
            reporter.clone(),
            clock.clone(),
        );
        let worker = ServiceWorker::new(
            WorkerSettings {
                origin: Url::parse(ORIGIN).unwrap(),
                cache_name: "herald-v2".into(),
                precache: vec!["/".into(), "/offline.html".into(), "/manifest.json".into()],
                offline_page: "/offline.html".into(),
            },
            CacheStorage::new(dir.path().join("caches")),
            fetcher.clone(),
            push,
            reporter,
            clock,
        );
        Harness {
            worker,
            fetcher,
            events,
            _dir: dir,
        }
    }

    fn drain(events: &mut mpsc::Receiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut out = Vec::new();
        while let Ok(e) = events.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn test_lifecycle_reaches_activated() {
        let mut h = harness();
        assert_eq!(h.worker.state(), WorkerState::Parsed);
        h.worker.start().await.unwrap();
        assert_eq!(h.worker.state(), WorkerState::Activated);

        let states: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                WorkerEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                WorkerState::Installing,
                WorkerState::Installed,
                WorkerState::Activating,
                WorkerState::Activated
            ]
        );
    }

    #[tokio::test]
    async fn test_install_precaches_manifest() {
        let h = harness();
        h.worker.install().await.unwrap();
        let cache = h.worker.active_cache().unwrap();
        assert_eq!(
            cache.urls().await.unwrap(),
            vec![
                "https://campaign.example/",
                "https://campaign.example/manifest.json",
                "https://campaign.example/offline.html",
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_asset_fails_install_and_stores_nothing() {
        let h = harness();
        h.fetcher.route(origin("/manifest.json").as_str(), 500, "boom");

        assert!(h.worker.install().await.is_err());
        assert_eq!(h.worker.state(), WorkerState::Redundant);
        assert!(h.worker.active_cache().is_none());

        // Retry after the asset recovers
        h.fetcher.route(origin("/manifest.json").as_str(), 200, "{}");
        h.worker.install().await.unwrap();
        assert_eq!(h.worker.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_failed_store_keeps_runtime_entries() {
        let h = harness();
        let cache = CacheStorage::new(h._dir.path().join("caches"))
            .open("herald-v2")
            .await
            .unwrap();
        let runtime = FetchRequest::get(origin("/events"));
        cache
            .put(&runtime, &FetchResponse::text(200, "events"))
            .await
            .unwrap();

        // A directory where the manifest entry belongs makes its write fail
        let blocked = cache.entry_path_for(&FetchRequest::get(origin("/manifest.json")));
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();

        assert!(h.worker.install().await.is_err());
        assert_eq!(h.worker.state(), WorkerState::Redundant);
        for path in ["/", "/offline.html"] {
            let written = FetchRequest::get(origin(path));
            assert!(cache.match_request(&written).await.unwrap().is_none(), "{path} left behind");
        }
        assert!(cache.match_request(&runtime).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_offline_page_is_precached_even_when_unlisted() {
        let mut h = harness();
        h.worker
            .settings
            .precache
            .retain(|path| path != "/offline.html");
        h.worker.start().await.unwrap();

        h.fetcher.set_offline(true);
        let response = h
            .worker
            .handle_fetch(FetchRequest::navigation(origin("/volunteer")))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "<h1>offline</h1>".as_bytes());
    }

    #[tokio::test]
    async fn test_lifecycle_retries_until_origin_is_back() {
        let h = harness();
        h.fetcher.set_offline(true);

        let worker = Arc::new(h.worker);
        let driver = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run_lifecycle(Duration::from_millis(10)).await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_ne!(worker.state(), WorkerState::Activated);

        h.fetcher.set_offline(false);
        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .expect("lifecycle should finish")
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let h = harness();
        assert!(h.worker.activate().await.is_err());
        assert_eq!(h.worker.state(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_activate_evicts_other_versions() {
        let mut h = harness();
        let storage = CacheStorage::new(h._dir.path().join("caches"));
        storage.open("herald-v1").await.unwrap();
        storage.open("unrelated").await.unwrap();

        h.worker.start().await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["herald-v2"]);

        let evicted = drain(&mut h.events).into_iter().find_map(|e| match e {
            WorkerEvent::Activated { evicted, .. } => Some(evicted),
            _ => None,
        });
        assert_eq!(evicted, Some(vec!["herald-v1".to_string(), "unrelated".to_string()]));
    }

    #[tokio::test]
    async fn test_fetch_before_activation_passes_through() {
        let h = harness();
        h.fetcher.set_offline(true);
        let response = h.worker.handle_fetch(FetchRequest::navigation(origin("/"))).await;
        assert_eq!(response.status, 502);
    }

    #[tokio::test]
    async fn test_cross_origin_is_not_cached() {
        let h = harness();
        h.worker.start().await.unwrap();
        h.fetcher.route("https://cdn.example/lib.js", 200, "js");

        let request = FetchRequest::get(Url::parse("https://cdn.example/lib.js").unwrap());
        let response = h.worker.handle_fetch(request.clone()).await;
        assert_eq!(response.status, 200);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let cache = h.worker.active_cache().unwrap();
        assert!(cache.match_request(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_origin_document_lands_in_cache() {
        let h = harness();
        h.worker.start().await.unwrap();
        h.fetcher.route(origin("/events").as_str(), 200, "<h1>events</h1>");

        let request = FetchRequest::navigation(origin("/events"));
        let response = h.worker.handle_fetch(request.clone()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "<h1>events</h1>".as_bytes());

        let cache = h.worker.active_cache().unwrap();
        let mut cached = None;
        for _ in 0..100 {
            cached = cache.match_request(&request).await.unwrap();
            if cached.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cached, Some(response));
    }

    #[tokio::test]
    async fn test_offline_navigation_serves_offline_page() {
        let mut h = harness();
        h.worker.start().await.unwrap();
        drain(&mut h.events);
        h.fetcher.set_offline(true);

        let response = h
            .worker
            .handle_fetch(FetchRequest::navigation(origin("/never-visited")))
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "<h1>offline</h1>".as_bytes());

        let events = drain(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkerEvent::Connectivity { online: false, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkerEvent::OfflineServed { fallback: true, .. })));

        // Back online
        h.fetcher.set_offline(false);
        h.worker.handle_fetch(FetchRequest::get(origin("/"))).await;
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, WorkerEvent::Connectivity { online: true, .. })));
    }

    #[tokio::test]
    async fn test_offline_subresource_gets_408() {
        let h = harness();
        h.worker.start().await.unwrap();
        h.fetcher.set_offline(true);

        let response = h
            .worker
            .handle_fetch(FetchRequest::get(origin("/api/rallies.json")))
            .await;
        assert_eq!(response.status, 408);
        assert_eq!(response.body, "Network error happened".as_bytes());
    }
}
