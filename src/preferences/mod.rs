//! Notification preference store
//!
//! Source of truth for which notification categories the user wants and when
//! notifications should be silenced. The store is loaded eagerly, falls back
//! to defaults when the persisted blob is missing or corrupt, and writes
//! through after every mutation.
//!
//! Every mutation also publishes the new [`PreferenceSet`] on a watch channel.
//! The worker side keeps its own copy of the filtering decision fed from that
//! channel, since it does not share this instance.

mod schedule;
mod transfer;

use crate::clock::{Clock, SharedClock};
use crate::storage::{self, SharedStore, PREFERENCES_KEY};
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tokio::sync::watch;

pub use schedule::{minutes_of, parse_minutes, QuietHoursSchedule};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A notification category the user can toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCategory {
    #[serde(default)]
    pub id: String,
    pub label: String,
    pub description: String,
    pub enabled: bool,
}

impl NotificationCategory {
    fn new(id: &str, label: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            enabled: true,
        }
    }
}

/// The four built-in categories, in display order
pub fn default_categories() -> Vec<NotificationCategory> {
    vec![
        NotificationCategory::new(
            "events",
            "Campaign Events",
            "Rallies, town halls, and events near you",
        ),
        NotificationCategory::new(
            "news",
            "Campaign News",
            "Announcements and policy updates",
        ),
        NotificationCategory::new(
            "volunteer",
            "Volunteer Opportunities",
            "Shifts, canvassing, and phone banks that need help",
        ),
        NotificationCategory::new(
            "local",
            "Local Updates",
            "News from your district and local organizers",
        ),
    ]
}

/// Notification frequency level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Minimal,
    #[default]
    Normal,
    All,
}

impl Frequency {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minimal" => Some(Self::Minimal),
            "normal" => Some(Self::Normal),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Normal => "normal",
            Self::All => "all",
        }
    }
}

/// Categories keyed by id, kept in insertion order
///
/// Serialized as a JSON object (`{"events": {...}, "news": {...}}`) so the
/// persisted blob matches the web app's shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Categories(Vec<NotificationCategory>);

impl Categories {
    pub fn get(&self, id: &str) -> Option<&NotificationCategory> {
        self.0.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut NotificationCategory> {
        self.0.iter_mut().find(|c| c.id == id)
    }

    /// Insert or replace by id, keeping the original position on replace
    pub fn upsert(&mut self, category: NotificationCategory) {
        match self.get_mut(&category.id) {
            Some(existing) => *existing = category,
            None => self.0.push(category),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotificationCategory> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<NotificationCategory>> for Categories {
    fn from(categories: Vec<NotificationCategory>) -> Self {
        let mut out = Categories::default();
        for c in categories {
            out.upsert(c);
        }
        out
    }
}

impl Serialize for Categories {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for c in &self.0 {
            map.serialize_entry(&c.id, c)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Categories {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CategoriesVisitor;

        impl<'de> Visitor<'de> for CategoriesVisitor {
            type Value = Categories;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category id to category")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Categories::default();
                while let Some((id, mut category)) =
                    access.next_entry::<String, NotificationCategory>()?
                {
                    // The map key is the identity
                    category.id = id;
                    out.upsert(category);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(CategoriesVisitor)
    }
}

/// Root preference aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceSet {
    pub categories: Categories,
    pub schedule: QuietHoursSchedule,
    pub frequency: Frequency,
    pub last_updated: DateTime<Utc>,
}

impl PreferenceSet {
    pub fn defaults(now: DateTime<Utc>) -> Self {
        Self {
            categories: default_categories().into(),
            schedule: QuietHoursSchedule::default(),
            frequency: Frequency::default(),
            last_updated: now,
        }
    }

    /// Filtering decision for a category at a local wall-clock minute
    ///
    /// Unknown or missing categories fail open.
    pub fn should_show_at(&self, category: Option<&str>, minutes: u32) -> bool {
        let Some(category) = category.filter(|c| !c.is_empty()) else {
            return true;
        };
        let Some(entry) = self.categories.get(category) else {
            return true;
        };
        if !entry.enabled {
            return false;
        }
        !self.schedule.is_quiet_at(minutes)
    }
}

/// Errors surfaced by preference setters
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PreferenceError {
    #[error("invalid frequency '{0}' (expected minimal, normal or all)")]
    InvalidFrequency(String),

    #[error("invalid time '{0}' (expected HH:MM)")]
    InvalidTime(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent preference store bound to one key of the key-value backend
pub struct PreferenceStore {
    prefs: PreferenceSet,
    store: SharedStore,
    clock: SharedClock,
    changes: watch::Sender<PreferenceSet>,
}

impl PreferenceStore {
    /// Load from the backend, falling back to defaults on missing/corrupt data
    pub fn load(store: SharedStore, clock: SharedClock) -> Self {
        let prefs = read_stored(store.as_ref(), clock.now());
        let (changes, _) = watch::channel(prefs.clone());
        Self {
            prefs,
            store,
            clock,
            changes,
        }
    }

    /// Re-read the backend after another process wrote to it
    ///
    /// Publishes to subscribers only when something changed. Returns whether it did.
    pub fn reload(&mut self) -> bool {
        let stored = read_stored(self.store.as_ref(), self.clock.now());
        if stored == self.prefs {
            return false;
        }
        tracing::debug!("Notification preferences changed in storage, reloading");
        self.prefs = stored;
        self.changes.send_replace(self.prefs.clone());
        true
    }

    /// Current preferences
    pub fn preferences(&self) -> &PreferenceSet {
        &self.prefs
    }

    /// Watch preference changes (the worker-side filter subscribes here)
    pub fn subscribe(&self) -> watch::Receiver<PreferenceSet> {
        self.changes.subscribe()
    }

    /// Categories in display order
    pub fn categories(&self) -> Vec<NotificationCategory> {
        self.prefs.categories.iter().cloned().collect()
    }

    /// Toggle a category; unknown ids are ignored
    pub fn update_category(&mut self, id: &str, enabled: bool) {
        let Some(category) = self.prefs.categories.get_mut(id) else {
            tracing::debug!(category = id, "Ignoring update for unknown category");
            return;
        };
        category.enabled = enabled;
        self.commit();
    }

    /// Update quiet hours; omitted times keep their previous value
    pub fn update_quiet_hours(
        &mut self,
        enabled: bool,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<(), PreferenceError> {
        for time in [start, end].into_iter().flatten() {
            if parse_minutes(time).is_none() {
                return Err(PreferenceError::InvalidTime(time.to_string()));
            }
        }

        let schedule = &mut self.prefs.schedule;
        schedule.quiet = enabled;
        if let Some(start) = start {
            schedule.quiet_hours_start = start.to_string();
        }
        if let Some(end) = end {
            schedule.quiet_hours_end = end.to_string();
        }
        self.commit();
        Ok(())
    }

    /// Set the frequency level; values outside minimal/normal/all are rejected
    /// without touching the stored preferences
    pub fn update_frequency(&mut self, level: &str) -> Result<(), PreferenceError> {
        let Some(frequency) = Frequency::parse(level) else {
            tracing::warn!(level, "Rejected invalid notification frequency");
            return Err(PreferenceError::InvalidFrequency(level.to_string()));
        };
        self.prefs.frequency = frequency;
        self.commit();
        Ok(())
    }

    /// Whether the current local time is inside the quiet window
    pub fn is_quiet_time(&self) -> bool {
        let now = minutes_of(self.clock.local_now().time());
        self.prefs.schedule.is_quiet_at(now)
    }

    /// Filtering policy for an incoming notification
    pub fn should_show_notification(&self, category: Option<&str>) -> bool {
        let now = minutes_of(self.clock.local_now().time());
        self.prefs.should_show_at(category, now)
    }

    /// Restore defaults and persist
    pub fn reset_to_defaults(&mut self) {
        self.prefs = PreferenceSet::defaults(self.clock.now());
        self.persist();
        self.changes.send_replace(self.prefs.clone());
    }

    /// Stamp, persist and publish after a mutation
    fn commit(&mut self) {
        self.prefs.last_updated = self.clock.now();
        self.persist();
        self.changes.send_replace(self.prefs.clone());
    }

    fn persist(&self) {
        if let Err(e) = storage::save_json(self.store.as_ref(), PREFERENCES_KEY, &self.prefs) {
            tracing::error!("Failed to persist notification preferences: {:#}", e);
        }
    }
}

fn read_stored(store: &dyn crate::storage::KeyValueStore, now: DateTime<Utc>) -> PreferenceSet {
    match storage::load_json::<transfer::PartialPreferences>(store, PREFERENCES_KEY) {
        Some(saved) => {
            let last_updated = saved.last_updated.unwrap_or(now);
            let mut prefs = saved.merge_onto_defaults(Frequency::default(), now);
            prefs.last_updated = last_updated;
            prefs
        }
        None => {
            tracing::debug!("No stored notification preferences, using defaults");
            PreferenceSet::defaults(now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::{local, FixedClock};
    use crate::clock::Clock;
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn fresh() -> (PreferenceStore, Arc<MemoryStore>, Arc<FixedClock>) {
        let backend = Arc::new(MemoryStore::new());
        let clock = FixedClock::at(local(2026, 6, 15, 12, 0));
        let store = PreferenceStore::load(backend.clone(), clock.clone());
        (store, backend, clock)
    }

    #[test]
    fn test_first_run_has_all_default_categories_enabled() {
        let (store, _, _) = fresh();
        let categories = store.categories();
        let ids: Vec<_> = categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["events", "news", "volunteer", "local"]);
        assert!(categories.iter().all(|c| c.enabled));
        assert_eq!(store.preferences().frequency, Frequency::Normal);
    }

    #[test]
    fn test_disabled_category_is_never_shown() {
        let (mut store, _, clock) = fresh();
        store.update_category("news", false);
        assert!(!store.should_show_notification(Some("news")));

        clock.set(local(2026, 6, 15, 23, 0));
        store.update_quiet_hours(true, Some("22:00"), Some("08:00")).unwrap();
        assert!(!store.should_show_notification(Some("news")));
    }

    #[test]
    fn test_unknown_category_fails_open() {
        let (mut store, backend, _) = fresh();
        store.update_category("bogus", false);
        // No-op: nothing persisted
        assert!(backend.get(PREFERENCES_KEY).is_none());
        assert!(store.should_show_notification(Some("bogus")));
        assert!(store.should_show_notification(None));
        assert!(store.should_show_notification(Some("")));
    }

    #[test]
    fn test_quiet_hours_wrapping_window() {
        let (mut store, _, clock) = fresh();
        store.update_quiet_hours(true, Some("22:00"), Some("08:00")).unwrap();

        clock.set(local(2026, 6, 15, 23, 30));
        assert!(store.is_quiet_time());
        clock.set(local(2026, 6, 16, 5, 0));
        assert!(store.is_quiet_time());
        clock.set(local(2026, 6, 16, 12, 0));
        assert!(!store.is_quiet_time());
    }

    #[test]
    fn test_quiet_hours_non_wrapping_window() {
        let (mut store, _, clock) = fresh();
        store.update_quiet_hours(true, Some("08:00"), Some("22:00")).unwrap();

        clock.set(local(2026, 6, 15, 12, 0));
        assert!(store.is_quiet_time());
        clock.set(local(2026, 6, 15, 23, 0));
        assert!(!store.is_quiet_time());
    }

    #[test]
    fn test_quiet_hours_keeps_omitted_times() {
        let (mut store, _, _) = fresh();
        store.update_quiet_hours(true, Some("21:15"), None).unwrap();
        store.update_quiet_hours(false, None, None).unwrap();

        let schedule = &store.preferences().schedule;
        assert!(!schedule.quiet);
        assert_eq!(schedule.quiet_hours_start, "21:15");
        assert_eq!(schedule.quiet_hours_end, "08:00");
    }

    #[test]
    fn test_quiet_hours_rejects_bad_times() {
        let (mut store, _, _) = fresh();
        let before = store.preferences().clone();
        assert_eq!(
            store.update_quiet_hours(true, Some("25:00"), None),
            Err(PreferenceError::InvalidTime("25:00".to_string()))
        );
        assert_eq!(store.preferences(), &before);
    }

    #[test]
    fn test_scenario_quiet_hours_and_disabled_category() {
        let (mut store, _, clock) = fresh();
        store.update_quiet_hours(true, Some("22:00"), Some("08:00")).unwrap();
        store.update_category("news", false);

        for (h, m, events_shown) in [(12, 0, true), (21, 59, true), (22, 0, false), (3, 0, false), (8, 1, true)] {
            clock.set(local(2026, 6, 16, h, m));
            assert!(!store.should_show_notification(Some("news")), "news at {h}:{m}");
            assert_eq!(
                store.should_show_notification(Some("events")),
                events_shown,
                "events at {h}:{m}"
            );
        }
    }

    #[test]
    fn test_invalid_frequency_is_rejected_without_mutation() {
        let (mut store, backend, _) = fresh();
        assert!(store.update_frequency("hourly").is_err());
        assert_eq!(store.preferences().frequency, Frequency::Normal);
        assert!(backend.get(PREFERENCES_KEY).is_none());

        store.update_frequency("minimal").unwrap();
        assert_eq!(store.preferences().frequency, Frequency::Minimal);
    }

    #[test]
    fn test_mutations_persist_and_reload() {
        let (mut store, backend, clock) = fresh();
        store.update_category("volunteer", false);
        store.update_frequency("all").unwrap();

        let reloaded = PreferenceStore::load(backend, clock);
        assert_eq!(reloaded.preferences(), store.preferences());
    }

    #[test]
    fn test_corrupt_blob_falls_back_to_defaults() {
        let backend = Arc::new(MemoryStore::new());
        backend.set(PREFERENCES_KEY, "{\"categories\": [").unwrap();
        let clock = FixedClock::at(local(2026, 6, 15, 12, 0));
        let store = PreferenceStore::load(backend, clock.clone());
        assert_eq!(store.preferences(), &PreferenceSet::defaults(clock.now()));
    }

    #[test]
    fn test_older_blob_gains_new_categories() {
        let backend = Arc::new(MemoryStore::new());
        backend
            .set(
                PREFERENCES_KEY,
                r#"{"categories":{"news":{"id":"news","label":"News","description":"","enabled":false}},
                    "schedule":{"quiet":true,"quietHoursStart":"23:00","quietHoursEnd":"06:00"},
                    "frequency":"minimal","lastUpdated":"2026-01-01T00:00:00Z"}"#,
            )
            .unwrap();
        let clock = FixedClock::at(local(2026, 6, 15, 12, 0));
        let store = PreferenceStore::load(backend, clock);

        let prefs = store.preferences();
        assert_eq!(prefs.categories.len(), 4);
        assert!(!prefs.categories.get("news").unwrap().enabled);
        assert!(prefs.categories.get("local").unwrap().enabled);
        assert_eq!(prefs.schedule.quiet_hours_start, "23:00");
        assert_eq!(prefs.frequency, Frequency::Minimal);
        assert_eq!(prefs.last_updated.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_changes_are_published() {
        let (mut store, _, _) = fresh();
        let mut rx = store.subscribe();
        store.update_category("local", false);
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().categories.get("local").unwrap().enabled);
    }

    #[test]
    fn test_reset_to_defaults() {
        let (mut store, _, clock) = fresh();
        store.update_category("events", false);
        store.reset_to_defaults();
        assert_eq!(store.preferences(), &PreferenceSet::defaults(clock.now()));
    }

    #[test]
    fn test_reload_picks_up_writes_from_another_store() {
        let (mut daemon, backend, clock) = fresh();
        let mut rx = daemon.subscribe();
        assert!(!daemon.reload());

        let mut other = PreferenceStore::load(backend, clock);
        other.update_category("events", false);

        assert!(daemon.reload());
        assert!(!daemon.preferences().categories.get("events").unwrap().enabled);
        assert!(rx.has_changed().unwrap());
        assert!(!daemon.reload());
    }
}
