//! Worker-side copy of the notification filtering decision
//!
//! The worker cannot reach the app side's `PreferenceStore`. It follows the
//! snapshots the store publishes and applies the same rule to them.

use crate::clock::{Clock, SharedClock};
use crate::preferences::{minutes_of, PreferenceSet};
use tokio::sync::watch;

#[derive(Clone)]
pub struct NotificationFilter {
    prefs: Option<watch::Receiver<PreferenceSet>>,
    clock: SharedClock,
}

impl NotificationFilter {
    pub fn new(prefs: watch::Receiver<PreferenceSet>, clock: SharedClock) -> Self {
        Self {
            prefs: Some(prefs),
            clock,
        }
    }

    /// Filter with no preference feed; lets everything through
    #[cfg(test)]
    pub fn allow_all(clock: SharedClock) -> Self {
        Self { prefs: None, clock }
    }

    pub fn allows(&self, category: Option<&str>) -> bool {
        let Some(prefs) = &self.prefs else {
            return true;
        };
        let now = minutes_of(self.clock.local_now().time());
        prefs.borrow().should_show_at(category, now)
    }
}
