//! Configuration for the herald daemon and CLI
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/herald/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod logging;
mod sections;
mod serialization;


pub use logging::{FileLogging, LogRotation, LoggingConfig};
pub use sections::{FileHttp, FilePush, FileWorker, HttpConfig, PushConfig, WorkerConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8787);
const DEFAULT_ORIGIN: &str = "http://127.0.0.1:3000";
const DEFAULT_API: &str = "http://127.0.0.1:3000/api";

/// How the app is being displayed (recorded on every analytics event)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Installed app, no browser chrome
    #[default]
    Standalone,
    Browser,
}

impl DisplayMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "browser" => Self::Browser,
            _ => Self::Standalone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Browser => "browser",
        }
    }

    pub fn is_standalone(&self) -> bool {
        *self == Self::Standalone
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the worker/app HTTP surface binds to
    pub bind_addr: SocketAddr,

    /// The campaign site the worker serves and caches
    pub origin_url: String,

    /// Campaign API base (push subscribe/unsubscribe live under it)
    pub api_url: String,

    /// Root for the key-value store and the caches
    pub data_dir: PathBuf,

    /// Display mode recorded in analytics
    pub display_mode: DisplayMode,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Cache lifecycle settings
    pub worker: WorkerConfig,

    /// Push subscription settings
    pub push: PushConfig,

    /// Remote call settings
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND,
            origin_url: DEFAULT_ORIGIN.to_string(),
            api_url: DEFAULT_API.to_string(),
            data_dir: default_data_dir(),
            display_mode: DisplayMode::default(),
            logging: LoggingConfig::default(),
            worker: WorkerConfig::default(),
            push: PushConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("herald"))
        .unwrap_or_else(|| PathBuf::from("./herald-data"))
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub origin_url: Option<String>,
    pub api_url: Option<String>,
    pub data_dir: Option<String>,
    pub display_mode: Option<String>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// Optional [worker] section
    pub worker: Option<FileWorker>,

    /// Optional [push] section
    pub push: Option<FilePush>,

    /// Optional [http] section
    pub http: Option<FileHttp>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/herald/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("herald").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Config is optional
            }
        }

        // Use Config::default().to_toml() as single source of truth
        let template = Self::default().to_toml();
        let _ = std::fs::write(&path, template);
    }

    /// Load file config if it exists
    ///
    /// Exits the process if the file exists but cannot be parsed: a broken
    /// config should fail fast, not silently fall back to defaults.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
                    eprintln!("║  CONFIG ERROR - Failed to parse configuration file          ║");
                    eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
                    eprintln!("  File: {}\n", path.display());
                    eprintln!("  Error: {}\n", e);
                    eprintln!("  Tip: Check for:\n");
                    eprintln!("    - Missing quotes around string values");
                    eprintln!("    - Invalid boolean values (use true/false)");
                    eprintln!("    - Malformed array syntax (precache = [\"/\", ...])");
                    eprintln!("    - Typos in section names\n");
                    eprintln!("  To reset, run `herald config --reset`.\n");
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
                eprintln!("║  CONFIG ERROR - Cannot read configuration file              ║");
                eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
                eprintln!("  File: {}\n", path.display());
                eprintln!("  Error: {}\n", e);
                std::process::exit(1);
            }
        }
    }

    /// Load configuration: file -> env vars -> defaults
    pub fn from_env() -> Result<Self> {
        Self::from_parts(Self::load_file_config(), |name| std::env::var(name).ok())
    }

    /// Merge a parsed file with an environment lookup
    pub(crate) fn from_parts(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Bind address: env > file > default
        let bind_addr = match env("HERALD_BIND").or(file.bind_addr) {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("Invalid bind address '{addr}'"))?,
            None => DEFAULT_BIND,
        };

        // Origin URL: env > file > default
        let origin_url = env("HERALD_ORIGIN_URL")
            .or(file.origin_url)
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
        url::Url::parse(&origin_url)
            .with_context(|| format!("Invalid origin URL '{origin_url}'"))?;

        // API URL: env > file > default
        let api_url = env("HERALD_API_URL")
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API.to_string());

        // Data directory: env > file > default
        let data_dir = env("HERALD_DATA_DIR")
            .or(file.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        // Display mode: env > file > default
        let display_mode = env("HERALD_DISPLAY_MODE")
            .or(file.display_mode)
            .map(|s| DisplayMode::from_str(&s))
            .unwrap_or_default();

        // Subconfig loading with from_file() helpers
        let logging = LoggingConfig::from_file(file.logging);
        let worker = WorkerConfig::from_file(file.worker);
        let http = HttpConfig::from_file(file.http);

        // Push: env var for the public key takes precedence
        let push = PushConfig::from_file(file.push, env("HERALD_PUSH_PUBLIC_KEY"));

        Ok(Self {
            bind_addr,
            origin_url,
            api_url,
            data_dir,
            display_mode,
            logging,
            worker,
            push,
            http,
        })
    }

    /// Key-value store directory
    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    /// Cache storage directory
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("caches")
    }

    /// URL a local client uses to reach the daemon
    pub fn daemon_url(&self) -> String {
        let mut addr = self.bind_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        format!("http://{addr}")
    }
}
