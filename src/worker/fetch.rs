//! Request/response types and the network seam
//!
//! The worker only ever sees [`FetchRequest`] and [`FetchResponse`]; whether
//! the bytes came from the origin, the cache or a synthetic fallback is
//! decided by the strategy. [`Fetcher`] is the network, swapped for a stub
//! in tests.

use crate::http::HttpError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::time::Duration;
use url::Url;

/// Headers that describe the connection rather than the resource
///
/// `content-encoding` is not one of them: it describes the body bytes and has
/// to travel with them into the cache and back out to the page.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Request headers the fetch client sets itself
///
/// The client only decodes the encodings it advertises, so the page's own
/// `Accept-Encoding` (br, zstd, ...) must not reach the origin.
fn is_client_negotiated(name: &str) -> bool {
    name.eq_ignore_ascii_case("accept-encoding")
}

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Top-level page navigation (gets the offline page as last resort)
    pub navigate: bool,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
            navigate: false,
        }
    }

    pub fn navigation(url: Url) -> Self {
        Self {
            navigate: true,
            ..Self::get(url)
        }
    }

    /// Cache key: hex SHA-256 of `METHOD url`
    pub fn cache_key(&self) -> String {
        cache_key(self.method.as_str(), self.url.as_str())
    }

    /// Same scheme, host and port as `origin`
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

pub(crate) fn cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl FetchResponse {
    /// Plain-text response, used for synthetic errors
    pub fn text(status: u16, body: &'static str) -> Self {
        Self {
            status,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Network
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request; any HTTP status is `Ok`, only transport failures are `Err`
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, HttpError>;
}

/// Real network access via reqwest
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// `timeout` bounds the whole fetch, body included
    pub fn new(timeout: Duration) -> Result<Self> {
        // The cache must see the origin's own redirects, not follow them
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create fetch client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, HttpError> {
        let url = request.url.to_string();
        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            if !is_hop_by_hop(name) && !is_client_negotiated(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HttpError::classify(&url, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpError::classify(&url, e))?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Canned network: fixed responses per URL, or everything offline
    #[derive(Default)]
    pub struct StubFetcher {
        routes: Mutex<HashMap<String, FetchResponse>>,
        offline: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl StubFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(&self, url: &str, status: u16, body: &'static str) {
            self.routes.lock().unwrap().insert(
                url.to_string(),
                FetchResponse {
                    status,
                    headers: vec![("content-type".into(), "text/html".into())],
                    body: Bytes::from_static(body.as_bytes()),
                },
            );
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(HttpError::Network {
                    url: request.url.to_string(),
                    message: "offline".into(),
                });
            }
            Ok(self
                .routes
                .lock()
                .unwrap()
                .get(request.url.as_str())
                .cloned()
                .unwrap_or_else(|| FetchResponse::text(404, "not found")))
        }
    }
}
