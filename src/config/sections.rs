//! Worker, push and HTTP sections

use crate::subscription::PermissionPolicy;
use serde::Deserialize;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// [worker]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Version-tagged cache name; bump it to invalidate older caches
    pub cache_name: String,
    /// Same-origin paths stored at install
    pub precache: Vec<String>,
    /// Fallback document for offline navigations (precached even if not listed)
    pub offline_page: String,
    /// Seconds between install attempts after a failed install
    pub install_retry_secs: u64,
    /// Command used to open notification links (e.g. "xdg-open")
    pub open_command: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: "herald-v1".to_string(),
            precache: [
                "/",
                "/index.html",
                "/offline.html",
                "/manifest.json",
                "/icons/icon-72x72.png",
                "/icons/icon-192x192.png",
                "/icons/icon-512x512.png",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            offline_page: "/offline.html".to_string(),
            install_retry_secs: 30,
            open_command: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileWorker {
    pub cache_name: Option<String>,
    pub precache: Option<Vec<String>>,
    pub offline_page: Option<String>,
    pub install_retry_secs: Option<u64>,
    pub open_command: Option<String>,
}

impl WorkerConfig {
    pub fn from_file(file: Option<FileWorker>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            cache_name: file.cache_name.unwrap_or(defaults.cache_name),
            precache: file.precache.unwrap_or(defaults.precache),
            offline_page: file.offline_page.unwrap_or(defaults.offline_page),
            install_retry_secs: file
                .install_retry_secs
                .unwrap_or(defaults.install_retry_secs)
                .max(1),
            open_command: file.open_command.or(defaults.open_command),
        }
    }

    pub fn install_retry(&self) -> Duration {
        Duration::from_secs(self.install_retry_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [push]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Push manager availability
    pub enabled: bool,
    /// Application server (VAPID) public key
    pub public_key: String,
    /// How permission requests are answered
    pub permission: PermissionPolicy,
    /// Seconds to wait for a permission answer (0 = wait forever)
    pub permission_timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            public_key: String::new(),
            permission: PermissionPolicy::Prompt,
            permission_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FilePush {
    pub enabled: Option<bool>,
    pub public_key: Option<String>,
    pub permission: Option<String>,
    pub permission_timeout_secs: Option<u64>,
}

impl PushConfig {
    /// Create from file config; `env_public_key` overrides the file's key
    pub fn from_file(file: Option<FilePush>, env_public_key: Option<String>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            public_key: env_public_key
                .or(file.public_key)
                .unwrap_or(defaults.public_key),
            permission: file
                .permission
                .and_then(|s| PermissionPolicy::parse(&s))
                .unwrap_or(defaults.permission),
            permission_timeout_secs: file
                .permission_timeout_secs
                .unwrap_or(defaults.permission_timeout_secs),
        }
    }

    pub fn permission_timeout(&self) -> Option<Duration> {
        (self.permission_timeout_secs > 0).then(|| Duration::from_secs(self.permission_timeout_secs))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [http]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Timeout for remote calls and origin fetches
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileHttp {
    pub timeout_secs: Option<u64>,
}

impl HttpConfig {
    pub fn from_file(file: Option<FileHttp>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            timeout_secs: file
                .timeout_secs
                .unwrap_or(Self::default().timeout_secs)
                .max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
