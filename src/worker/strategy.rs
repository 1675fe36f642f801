//! Network-first fetch strategy
//!
//! ```text
//! request
//!     ↓
//! network ── ok ──→ 2xx GET? spawn cache write (not awaited) → return network response
//!     ↓ failed
//! cache exact match ──→ return cached
//!     ↓ miss
//! navigation? ──→ offline page from cache
//!     ↓
//! synthetic 408 "Network error happened"
//! ```

use super::cache::Cache;
use super::fetch::{FetchRequest, FetchResponse, Fetcher};
use reqwest::Method;

/// Body of the last-resort response
pub const NETWORK_ERROR_BODY: &str = "Network error happened";

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Network,
    Cache,
    OfflinePage,
    Synthetic,
}

impl Source {
    /// Served without the network
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Cache | Self::OfflinePage)
    }
}

#[derive(Debug)]
pub struct Served {
    pub response: FetchResponse,
    pub source: Source,
}

/// Network first, then cache, then offline page, then a synthetic 408
///
/// Always produces a response. `offline_page` is the absolute URL of the
/// precached fallback document.
pub async fn network_first(
    fetcher: &dyn Fetcher,
    cache: &Cache,
    offline_page: &str,
    request: &FetchRequest,
) -> Served {
    match fetcher.fetch(request).await {
        Ok(response) => {
            if response.is_success() && request.method == Method::GET {
                spawn_cache_write(cache.clone(), request.clone(), response.clone());
            }
            return Served {
                response,
                source: Source::Network,
            };
        }
        Err(e) => {
            tracing::info!(url = %request.url, "Network failed, trying cache: {}", e);
        }
    }

    match cache.match_request(request).await {
        Ok(Some(response)) => {
            return Served {
                response,
                source: Source::Cache,
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Cache lookup failed: {}", e),
    }

    if request.navigate {
        match cache.match_url("GET", offline_page).await {
            Ok(Some(response)) => {
                return Served {
                    response,
                    source: Source::OfflinePage,
                }
            }
            Ok(None) => tracing::warn!(offline_page, "Offline page missing from cache"),
            Err(e) => tracing::warn!("Offline page lookup failed: {}", e),
        }
    }

    Served {
        response: FetchResponse::text(408, NETWORK_ERROR_BODY),
        source: Source::Synthetic,
    }
}

/// Uncontrolled request: straight to the network, a gateway error if that fails
pub async fn passthrough(fetcher: &dyn Fetcher, request: &FetchRequest) -> FetchResponse {
    match fetcher.fetch(request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %request.url, "Passthrough fetch failed: {}", e);
            FetchResponse::text(502, "Bad gateway")
        }
    }
}

// Readers right after the response may not see the entry yet
fn spawn_cache_write(cache: Cache, request: FetchRequest, response: FetchResponse) {
    tokio::spawn(async move {
        if let Err(e) = cache.put(&request, &response).await {
            tracing::debug!(url = %request.url, "Cache write failed: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::cache::CacheStorage;
    use crate::worker::fetch::test_support::StubFetcher;
    use std::time::Duration;
    use tempfile::TempDir;
    use url::Url;

    const ORIGIN: &str = "https://campaign.example";

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    async fn cache(dir: &TempDir) -> Cache {
        CacheStorage::new(dir.path().to_path_buf())
            .open("herald-v1")
            .await
            .unwrap()
    }

    /// Wait for a fire-and-forget write to land
    async fn eventually_cached(cache: &Cache, request: &FetchRequest) -> Option<FetchResponse> {
        for _ in 0..100 {
            if let Ok(Some(hit)) = cache.match_request(request).await {
                return Some(hit);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_network_success_is_returned_and_cached() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        let fetcher = StubFetcher::new();
        fetcher.route(url("/events").as_str(), 200, "<h1>events</h1>");
        let request = FetchRequest::navigation(url("/events"));

        let served = network_first(&fetcher, &cache, url("/offline.html").as_str(), &request).await;
        assert_eq!(served.source, Source::Network);
        assert_eq!(served.response.body, "<h1>events</h1>".as_bytes());

        let cached = eventually_cached(&cache, &request).await.expect("entry written");
        assert_eq!(cached, served.response);
    }

    #[tokio::test]
    async fn test_error_status_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        let fetcher = StubFetcher::new();
        let request = FetchRequest::get(url("/missing"));

        let served = network_first(&fetcher, &cache, url("/offline.html").as_str(), &request).await;
        assert_eq!(served.source, Source::Network);
        assert_eq!(served.response.status, 404);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.match_request(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offline_serves_cached_copy() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        let request = FetchRequest::get(url("/css/app.css"));
        let stored = FetchResponse::text(200, "body{}");
        cache.put(&request, &stored).await.unwrap();

        let fetcher = StubFetcher::new();
        fetcher.set_offline(true);
        let served = network_first(&fetcher, &cache, url("/offline.html").as_str(), &request).await;
        assert_eq!(served.source, Source::Cache);
        assert_eq!(served.response, stored);
    }

    #[tokio::test]
    async fn test_offline_navigation_gets_offline_page() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        let offline = FetchResponse::text(200, "<h1>You are offline</h1>");
        cache
            .put(&FetchRequest::get(url("/offline.html")), &offline)
            .await
            .unwrap();

        let fetcher = StubFetcher::new();
        fetcher.set_offline(true);
        let request = FetchRequest::navigation(url("/volunteer"));
        let served = network_first(&fetcher, &cache, url("/offline.html").as_str(), &request).await;

        assert_eq!(served.source, Source::OfflinePage);
        assert_eq!(served.response.status, 200);
        assert_eq!(served.response.body, offline.body);
    }

    #[tokio::test]
    async fn test_offline_subresource_gets_synthetic_408() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        cache
            .put(
                &FetchRequest::get(url("/offline.html")),
                &FetchResponse::text(200, "offline"),
            )
            .await
            .unwrap();

        let fetcher = StubFetcher::new();
        fetcher.set_offline(true);
        let request = FetchRequest::get(url("/api/data.json"));
        let served = network_first(&fetcher, &cache, url("/offline.html").as_str(), &request).await;

        assert_eq!(served.source, Source::Synthetic);
        assert_eq!(served.response.status, 408);
        assert_eq!(served.response.header("content-type"), Some("text/plain"));
        assert_eq!(served.response.body, NETWORK_ERROR_BODY.as_bytes());
    }

    #[tokio::test]
    async fn test_passthrough_maps_failure_to_502() {
        let fetcher = StubFetcher::new();
        fetcher.set_offline(true);
        let response = passthrough(&fetcher, &FetchRequest::get(url("/"))).await;
        assert_eq!(response.status, 502);
    }
}
