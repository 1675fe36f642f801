// herald - notification and offline core for the campaign PWA
//
// The page and its service worker are two execution contexts. herald runs
// both in one process and lets them talk only through channels:
//
// - App side: PreferenceStore + UsageLog over a persistent key-value store
// - Worker side (axum): cache lifecycle, fetch interception, push delivery
// - Worker → app: WorkerEvent over mpsc, recorded into the usage log
// - App → worker: preference snapshots over watch, read by the push filter

mod analytics;
mod cli;
mod clock;
mod config;
mod events;
mod http;
mod logging;
mod preferences;
mod server;
mod storage;
mod subscription;
mod worker;

use analytics::UsageLog;
use anyhow::{Context, Result};
use clap::Parser;
use cli::Commands;
use config::{Config, VERSION};
use events::{EventReporter, WorkerEvent};
use preferences::PreferenceStore;
use server::AppState;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storage::{FileStore, MemoryStore, SharedStore};
use tokio::sync::mpsc;
use url::Url;
use worker::cache::CacheStorage;
use worker::fetch::ReqwestFetcher;
use worker::filter::NotificationFilter;
use worker::notifier::{CommandOpener, NotificationTray};
use worker::{PushGateway, ServiceWorker, WorkerSettings};

/// Worker events buffered before the reporter starts dropping them
const EVENT_BUFFER: usize = 1000;

/// How long shutdown waits for queued worker events to be recorded
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let command = cli::Cli::parse().command.unwrap_or(Commands::Serve);

    // Config management must work even when the file is broken
    if let Commands::Config {
        show,
        reset,
        edit,
        path,
    } = command
    {
        cli::handle_config(show, reset, edit, path);
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();
    let config = Config::from_env()?;

    match command {
        Commands::Serve => serve(config).await,
        command => {
            logging::init_cli();
            cli::run(command, &config).await
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    // Kept alive for the whole run so file logs flush
    let _file_guard = logging::init(&config.logging);

    tracing::info!("herald {} serving {}", VERSION, config.origin_url);
    tracing::debug!("Data directory: {}", config.data_dir.display());

    let clock = clock::system();
    let store: SharedStore = match FileStore::open(config.store_dir()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            // Like a browser without localStorage: everything works, nothing persists
            tracing::warn!("Store unavailable, keeping data in memory only: {:#}", e);
            Arc::new(MemoryStore::new())
        }
    };

    // App side
    let preferences = PreferenceStore::load(store.clone(), clock.clone());
    let filter = NotificationFilter::new(preferences.subscribe(), clock.clone());
    let preferences = Arc::new(Mutex::new(preferences));
    let analytics = Arc::new(Mutex::new(UsageLog::new(
        store.clone(),
        clock.clone(),
        config.display_mode.is_standalone(),
    )));

    // Worker → app events
    // Bounded; the reporter drops events rather than stall the worker
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let reporter = EventReporter::new(event_tx);
    let drain_handle = tokio::spawn(record_events(event_rx, analytics.clone()));

    // Worker side
    let origin = Url::parse(&config.origin_url).context("Invalid origin URL")?;
    let push = PushGateway::new(
        Arc::new(NotificationTray::default()),
        Arc::new(CommandOpener::new(config.worker.open_command.clone())),
        filter,
        origin.clone(),
        reporter.clone(),
        clock.clone(),
    );
    let worker = Arc::new(ServiceWorker::new(
        WorkerSettings {
            origin,
            cache_name: config.worker.cache_name.clone(),
            precache: config.worker.precache.clone(),
            offline_page: config.worker.offline_page.clone(),
        },
        CacheStorage::new(config.cache_dir()),
        Arc::new(ReqwestFetcher::new(config.http.timeout())?),
        push,
        reporter,
        clock,
    ));

    let lifecycle_handle = tokio::spawn({
        let worker = worker.clone();
        let retry = config.worker.install_retry();
        async move { worker.run_lifecycle(retry).await }
    });

    // Create shutdown channel for graceful server shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let state = AppState {
        worker,
        preferences,
        analytics: analytics.clone(),
    };
    let mut server_handle =
        tokio::spawn(server::start_server(config.bind_addr, state, shutdown_rx));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
            None
        }
        result = &mut server_handle => Some(result),
    };
    let outcome = match finished {
        Some(result) => result.context("Server task panicked").and_then(|r| r),
        None => {
            tracing::info!("Shutting down...");
            let _ = shutdown_tx.send(());
            server_handle
                .await
                .context("Server task panicked")
                .and_then(|r| r)
        }
    };

    // Every reporter clone lives in the worker; once the worker is gone the
    // event channel closes and the drain task finishes
    lifecycle_handle.abort();
    let _ = lifecycle_handle.await;
    if tokio::time::timeout(DRAIN_TIMEOUT, drain_handle).await.is_err() {
        tracing::warn!("Timed out recording queued worker events");
    }

    match analytics.lock() {
        Ok(mut log) => log.end_session(),
        Err(_) => tracing::error!("Analytics lock poisoned, session left open"),
    }

    tracing::info!("Shutdown complete");
    outcome
}

/// Record worker events into the usage log until every reporter is dropped
async fn record_events(mut rx: mpsc::Receiver<WorkerEvent>, log: Arc<Mutex<UsageLog>>) {
    while let Some(event) = rx.recv().await {
        match log.lock() {
            Ok(mut log) => event.record(&mut log),
            Err(_) => {
                tracing::error!("Analytics lock poisoned, no longer recording worker events");
                return;
            }
        }
    }
    tracing::debug!("Worker event channel closed");
}
