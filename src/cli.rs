// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - serve (default): run the worker daemon
// - config --show/--path/--reset/--edit: configuration file management
// - prefs: read and change notification preferences
// - stats: usage statistics
// - push: manage the push subscription
//
// Everything except `serve` works directly on the store under data_dir, the
// same way a second browser tab would. Preference changes are announced to a
// running daemon so its notification filter follows them.

use crate::analytics::{NotificationAction, UsageLog};
use crate::clock::{self, SharedClock};
use crate::config::{Config, VERSION};
use crate::http::HttpClient;
use crate::preferences::{PreferenceSet, PreferenceStore};
use crate::server::RELOAD_PREFERENCES_PATH;
use crate::storage::{FileStore, SharedStore};
use crate::subscription::{
    HttpSubscriptionSync, LocalPushPlatform, SubscriptionController, SyncOutcome,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// herald - offline cache and push notifications for the campaign app
#[derive(Parser)]
#[command(name = "herald")]
#[command(version = VERSION)]
#[command(about = "Offline cache and push notification core for the campaign app", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the worker daemon (default)
    Serve,

    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Open config file in $EDITOR
        #[arg(long)]
        edit: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Notification preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsCommand,
    },

    /// Usage statistics
    Stats {
        #[command(subcommand)]
        action: Option<StatsCommand>,
    },

    /// Push subscription
    Push {
        #[command(subcommand)]
        action: PushCommand,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        self == Switch::On
    }
}

#[derive(Subcommand)]
pub enum PrefsCommand {
    /// Show current preferences
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Enable or disable a category
    Category { id: String, state: Switch },
    /// Turn quiet hours on or off, optionally moving the window
    Quiet {
        state: Switch,
        /// Window start (HH:MM)
        #[arg(long)]
        start: Option<String>,
        /// Window end (HH:MM)
        #[arg(long)]
        end: Option<String>,
    },
    /// Set the frequency level: minimal, normal, all
    Frequency { level: String },
    /// Write an export file into a directory (default: current directory)
    Export { dir: Option<PathBuf> },
    /// Replace preferences from an export file
    Import { file: PathBuf },
    /// Restore defaults
    Reset,
}

#[derive(Subcommand)]
pub enum StatsCommand {
    /// Show derived statistics (default)
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Delete all recorded analytics
    Clear {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum PushCommand {
    /// Ask for permission and create a subscription
    Subscribe,
    /// Remove the subscription
    Unsubscribe,
    /// Show subscription status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show a notification through the running daemon
    Test {
        #[arg(long, default_value = "Test notification")]
        title: String,
        #[arg(long, default_value = "Push notifications are working.")]
        body: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Run a one-shot command (anything but `serve`)
pub async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Serve | Commands::Config { .. } => bail!("not a one-shot command"),
        Commands::Prefs { action } => handle_prefs(action, config).await,
        Commands::Stats { action } => {
            handle_stats(action.unwrap_or(StatsCommand::Show { json: false }), config)
        }
        Commands::Push { action } => handle_push(action, config).await,
    }
}

struct StoreHandle {
    store: SharedStore,
    clock: SharedClock,
}

fn open_store(config: &Config) -> Result<StoreHandle> {
    let store = FileStore::open(config.store_dir())
        .with_context(|| format!("Failed to open store at {}", config.store_dir().display()))?;
    Ok(StoreHandle {
        store: Arc::new(store),
        clock: clock::system(),
    })
}

fn confirm(question: &str) -> Result<bool> {
    eprint!("{question} [y/N] ");
    std::io::stderr().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

// ─────────────────────────────────────────────────────────────────────────────
// config
// ─────────────────────────────────────────────────────────────────────────────

/// Handle `herald config`; runs before the config is loaded so a broken file can be reset
pub fn handle_config(show: bool, reset: bool, edit: bool, path: bool) {
    if path {
        handle_config_path();
    } else if show {
        handle_config_show();
    } else if reset {
        handle_config_reset();
    } else if edit {
        handle_config_edit();
    } else {
        // No flag provided, show help
        println!("Usage: herald config [--show|--reset|--edit|--path]");
        println!();
        println!("Options:");
        println!("  --show    Display effective configuration");
        println!("  --reset   Reset config file to defaults");
        println!("  --edit    Open config file in $EDITOR");
        println!("  --path    Show config file path");
    }
}

fn handle_config_path() {
    match Config::config_path() {
        Some(path) => println!("{}", path.display()),
        None => {
            eprintln!("Error: Could not determine config path");
            std::process::exit(1);
        }
    }
}

fn handle_config_show() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());

    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if path.exists() {
        match confirm(&format!(
            "Config file exists at {}. Overwrite?",
            path.display()
        )) {
            Ok(true) => {}
            Ok(false) => {
                println!("Aborted.");
                return;
            }
            Err(e) => {
                eprintln!("Error reading answer: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("Error creating directory: {}", e);
            std::process::exit(1);
        }
    }

    // Write the default config (using Config's single source of truth)
    if let Err(e) = std::fs::write(&path, Config::default().to_toml()) {
        eprintln!("Error writing config: {}", e);
        std::process::exit(1);
    }

    println!("Config reset to defaults: {}", path.display());
}

fn handle_config_edit() {
    let Some(path) = Config::config_path() else {
        eprintln!("Error: Could not determine config path");
        std::process::exit(1);
    };

    if !path.exists() {
        Config::ensure_config_exists();
        println!("Created new config file: {}", path.display());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| {
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "nano".to_string()
            }
        });

    println!("Opening {} with {}", path.display(), editor);

    match Command::new(&editor).arg(&path).status() {
        Ok(status) if status.success() => {}
        Ok(status) => {
            eprintln!("Editor exited with status: {}", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to launch editor '{}': {}", editor, e);
            std::process::exit(1);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// prefs
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_prefs(action: PrefsCommand, config: &Config) -> Result<()> {
    let ctx = open_store(config)?;
    let mut prefs = PreferenceStore::load(ctx.store, ctx.clock);

    match action {
        PrefsCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(prefs.preferences())?);
            } else {
                print!("{}", describe_preferences(prefs.preferences()));
                if prefs.is_quiet_time() {
                    println!("\nQuiet hours are in effect right now.");
                }
                let held: Vec<_> = prefs
                    .categories()
                    .into_iter()
                    .filter(|c| !prefs.should_show_notification(Some(&c.id)))
                    .map(|c| c.id)
                    .collect();
                if !held.is_empty() {
                    println!("Held back right now: {}", held.join(", "));
                }
            }
            return Ok(());
        }
        PrefsCommand::Category { id, state } => {
            if prefs.preferences().categories.get(&id).is_none() {
                let known: Vec<_> = prefs.categories().into_iter().map(|c| c.id).collect();
                bail!("Unknown category '{}' (known: {})", id, known.join(", "));
            }
            prefs.update_category(&id, state.enabled());
            println!("Category '{}' {}", id, if state.enabled() { "enabled" } else { "disabled" });
        }
        PrefsCommand::Quiet { state, start, end } => {
            prefs.update_quiet_hours(state.enabled(), start.as_deref(), end.as_deref())?;
            let schedule = &prefs.preferences().schedule;
            println!(
                "Quiet hours {} ({} - {})",
                if schedule.quiet { "on" } else { "off" },
                schedule.quiet_hours_start,
                schedule.quiet_hours_end
            );
        }
        PrefsCommand::Frequency { level } => {
            prefs.update_frequency(&level)?;
            println!("Frequency set to {}", prefs.preferences().frequency.as_str());
        }
        PrefsCommand::Export { dir } => {
            let dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir().context("Failed to read current directory")?,
            };
            let path = prefs.export_to_dir(&dir)?;
            println!("{}", path.display());
            return Ok(());
        }
        PrefsCommand::Import { file } => {
            if !prefs.import_file(&file) {
                bail!("{} is not a valid preferences export", file.display());
            }
            println!("Imported preferences from {}", file.display());
        }
        PrefsCommand::Reset => {
            prefs.reset_to_defaults();
            println!("Preferences reset to defaults");
        }
    }

    announce_preferences_changed(config).await;
    Ok(())
}

/// Tell a running daemon to re-read preferences; silent when none is running
async fn announce_preferences_changed(config: &Config) {
    let client = match HttpClient::new(&config.daemon_url(), Duration::from_secs(1)) {
        Ok(client) => client,
        Err(e) => {
            tracing::debug!("No daemon client: {:#}", e);
            return;
        }
    };
    match client.post_json(RELOAD_PREFERENCES_PATH, &()).await {
        Ok(_) => tracing::debug!("Daemon reloaded preferences"),
        // Daemon not running; it reads the store on start
        Err(e) if e.is_network() => tracing::debug!("Daemon not notified: {}", e),
        Err(e) => tracing::warn!("Daemon rejected preference reload: {}", e),
    }
}

pub(crate) fn describe_preferences(prefs: &PreferenceSet) -> String {
    let mut out = String::new();
    out.push_str("Categories:\n");
    for category in prefs.categories.iter() {
        out.push_str(&format!(
            "  [{}] {:<10} {}\n",
            if category.enabled { "x" } else { " " },
            category.id,
            category.label
        ));
    }
    let schedule = &prefs.schedule;
    out.push_str(&format!(
        "Quiet hours: {} ({} - {})\n",
        if schedule.quiet { "on" } else { "off" },
        schedule.quiet_hours_start,
        schedule.quiet_hours_end
    ));
    out.push_str(&format!("Frequency: {}\n", prefs.frequency.as_str()));
    out.push_str(&format!("Last updated: {}\n", prefs.last_updated.to_rfc3339()));
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// stats
// ─────────────────────────────────────────────────────────────────────────────

fn handle_stats(action: StatsCommand, config: &Config) -> Result<()> {
    let ctx = open_store(config)?;
    let mut log = UsageLog::load(ctx.store, ctx.clock, config.display_mode.is_standalone());

    match action {
        StatsCommand::Show { json: true } => {
            println!("{}", serde_json::to_string_pretty(&log.stats())?);
        }
        StatsCommand::Show { json: false } => {
            let stats = log.stats();
            println!("Sessions:        {}", stats.total_sessions);
            println!(
                "Avg session:     {}s",
                stats.average_session_length / 1000
            );
            println!("Last 7 days:     {:?}", stats.last_week_sessions);
            println!("Events:          {}", stats.events);
            match stats.install_date {
                Some(date) => println!("Installed:       {}", date.to_rfc3339()),
                None => println!("Installed:       no"),
            }
            println!(
                "Notifications:   granted={} subscribed={} received={} clicked={}",
                stats.notifications.granted,
                stats.notifications.subscribed,
                stats.notifications.received,
                stats.notifications.clicked
            );
            println!("Offline uses:    {}", stats.offline.usage);
        }
        StatsCommand::Clear { yes } => {
            if !yes && !confirm("Delete all usage analytics?")? {
                println!("Aborted.");
                return Ok(());
            }
            log.clear_data();
            println!("Analytics cleared");
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// push
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_push(action: PushCommand, config: &Config) -> Result<()> {
    let ctx = open_store(config)?;
    let timeout = config.http.timeout();

    let platform = LocalPushPlatform::new(
        ctx.store.clone(),
        ctx.clock.clone(),
        config.push.permission,
        config.push.enabled,
        HttpClient::new(&config.daemon_url(), timeout)?,
    );
    let sync = HttpSubscriptionSync::new(HttpClient::new(&config.api_url, timeout)?);
    let mut controller = SubscriptionController::new(
        Arc::new(platform),
        Arc::new(sync),
        config.push.public_key.clone(),
    );
    if let Some(timeout) = config.push.permission_timeout() {
        controller = controller.with_permission_timeout(timeout);
    }

    match action {
        PushCommand::Subscribe => {
            if config.push.public_key.is_empty() {
                tracing::warn!("No push public key configured (set push.public_key)");
            }
            let subscribed = controller.subscribe().await?;

            let mut log =
                UsageLog::load(ctx.store, ctx.clock, config.display_mode.is_standalone());
            log.track_notification(NotificationAction::Grant, None);
            log.track_notification(NotificationAction::Subscribe, None);

            println!("Subscribed: {}", subscribed.subscription.endpoint);
            if subscribed.sync == SyncOutcome::Failed {
                println!("Warning: the campaign server was not reached; it will not send pushes yet");
            }
        }
        PushCommand::Unsubscribe => {
            controller.unsubscribe().await?;
            println!("Unsubscribed");
        }
        PushCommand::Status { json } => {
            let status = controller.check_status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else if !status.supported {
                println!("Push is not supported (push.enabled = false)");
            } else if status.is_subscribed {
                println!("Subscribed");
            } else {
                println!("Not subscribed");
            }
        }
        PushCommand::Test { title, body } => {
            controller.send_test_notification(&title, &body).await?;
            println!("Test notification sent");
        }
    }
    Ok(())
}
