//! HTTP client for remote calls
//!
//! Every call to the campaign API goes through here so it gets the same short
//! timeout and the same failure classification. Callers decide whether a
//! failure is fatal (fail closed) or best-effort (fail open).

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// Why a remote call failed
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("network failure calling {url}: {message}")]
    Network { url: String, message: String },

    #[error("server returned {status} for {url}")]
    Server { url: String, status: StatusCode },

    #[error("invalid URL '{0}'")]
    InvalidUrl(String),
}

impl HttpError {
    /// Timeouts and connection failures, as opposed to an answer from the server
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Network { .. })
    }

    pub(crate) fn classify(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = e.status() {
            Self::Server {
                url: url.to_string(),
                status,
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

/// Timeout-bounded JSON client rooted at a base URL
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base: Url,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid API URL {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, base })
    }

    /// Resolve a path against the base URL, keeping any base path prefix
    pub fn url_for(&self, path: &str) -> Result<Url, HttpError> {
        let mut joined = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        joined.set_path(&format!("{}/{}", prefix, path.trim_start_matches('/')));
        if joined.cannot_be_a_base() {
            return Err(HttpError::InvalidUrl(joined.to_string()));
        }
        Ok(joined)
    }

    /// POST a JSON body; non-2xx responses are `HttpError::Server`
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<StatusCode, HttpError> {
        let url = self.url_for(path)?;
        let url_str = url.to_string();

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| HttpError::classify(&url_str, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Server {
                url: url_str,
                status,
            });
        }
        Ok(status)
    }
}
