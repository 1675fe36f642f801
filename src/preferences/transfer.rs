//! Preference export and import
//!
//! Export wraps the current preferences in a versioned envelope. Import is
//! deliberately forgiving about schema drift: categories and schedule are
//! merged field-by-field on top of the defaults, so an older export does not
//! drop categories introduced later and an export from a newer build can add
//! categories this build does not know about.

use super::{
    Frequency, NotificationCategory, PreferenceSet, PreferenceStore, QuietHoursSchedule,
};
use crate::clock::Clock;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Export format version
pub const EXPORT_VERSION: &str = "1.0";

/// Export file contents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub preferences: PreferenceSet,
    pub export_date: DateTime<Utc>,
    pub version: String,
}

/// Preferences as found in an import file or an older stored blob
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PartialPreferences {
    #[serde(default)]
    categories: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    schedule: Option<PartialSchedule>,
    #[serde(default)]
    frequency: Option<String>,
    #[serde(default)]
    pub(super) last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialSchedule {
    quiet: Option<bool>,
    quiet_hours_start: Option<String>,
    quiet_hours_end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialCategory {
    label: Option<String>,
    description: Option<String>,
    enabled: Option<bool>,
}

impl PartialPreferences {
    /// Overlay onto defaults; `frequency` falls back to `current_frequency`
    pub(super) fn merge_onto_defaults(
        self,
        current_frequency: Frequency,
        now: DateTime<Utc>,
    ) -> PreferenceSet {
        let mut merged = PreferenceSet::defaults(now);

        for (id, value) in self.categories.unwrap_or_default() {
            let partial: PartialCategory = match serde_json::from_value(value) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(category = %id, "Skipping malformed category: {}", e);
                    continue;
                }
            };
            let base = merged
                .categories
                .get(&id)
                .cloned()
                .unwrap_or_else(|| NotificationCategory {
                    id: id.clone(),
                    label: id.clone(),
                    description: String::new(),
                    enabled: true,
                });
            merged.categories.upsert(NotificationCategory {
                id,
                label: partial.label.unwrap_or(base.label),
                description: partial.description.unwrap_or(base.description),
                enabled: partial.enabled.unwrap_or(base.enabled),
            });
        }

        if let Some(schedule) = self.schedule {
            let base = QuietHoursSchedule::default();
            merged.schedule = QuietHoursSchedule {
                quiet: schedule.quiet.unwrap_or(base.quiet),
                quiet_hours_start: schedule.quiet_hours_start.unwrap_or(base.quiet_hours_start),
                quiet_hours_end: schedule.quiet_hours_end.unwrap_or(base.quiet_hours_end),
            };
        }

        merged.frequency = match self.frequency.as_deref() {
            Some(level) => Frequency::parse(level).unwrap_or_else(|| {
                tracing::warn!(level, "Ignoring unknown frequency in imported preferences");
                current_frequency
            }),
            None => current_frequency,
        };

        merged
    }
}

impl PreferenceStore {
    /// Serialize the current preferences into the export envelope
    pub fn export_preferences(&self) -> Result<String> {
        let envelope = ExportEnvelope {
            preferences: self.prefs.clone(),
            export_date: self.clock.now(),
            version: EXPORT_VERSION.to_string(),
        };
        serde_json::to_string_pretty(&envelope).context("Failed to serialize preferences export")
    }

    /// Write the export as `notification-preferences-YYYY-MM-DD.json` into `dir`
    pub fn export_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let date = self.clock.now().with_timezone(&Local).format("%Y-%m-%d");
        let path = dir.join(format!("notification-preferences-{}.json", date));
        let json = self.export_preferences()?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write export to {}", path.display()))?;
        tracing::info!("Exported notification preferences to {}", path.display());
        Ok(path)
    }

    /// Import an export file's contents
    ///
    /// Returns `false` without touching the current preferences when the
    /// content is not JSON, lacks `preferences`/`version`/`exportDate`, or the
    /// preferences section has the wrong shape.
    pub fn import_preferences(&mut self, content: &str) -> bool {
        let envelope: serde_json::Value = match serde_json::from_str(content) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Preference import is not valid JSON: {}", e);
                return false;
            }
        };

        let Some(fields) = envelope.as_object() else {
            tracing::warn!("Preference import is not a JSON object");
            return false;
        };
        for key in ["preferences", "version", "exportDate"] {
            if !fields.contains_key(key) {
                tracing::warn!(key, "Preference import is missing a required field");
                return false;
            }
        }

        let partial: PartialPreferences = match serde_json::from_value(fields["preferences"].clone())
        {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Preference import has a malformed preferences section: {}", e);
                return false;
            }
        };

        let now = self.clock.now();
        self.prefs = partial.merge_onto_defaults(self.prefs.frequency, now);
        self.commit();
        tracing::info!("Imported notification preferences");
        true
    }

    /// Import from a file on disk
    pub fn import_file(&mut self, path: &Path) -> bool {
        match std::fs::read_to_string(path) {
            Ok(content) => self.import_preferences(&content),
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                false
            }
        }
    }
}
