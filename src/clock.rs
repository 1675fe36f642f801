//! Wall-clock source shared by the stores
//!
//! Quiet hours are evaluated in device-local time while every persisted
//! timestamp is UTC. Stores take an `Arc<dyn Clock>` so tests can pin "now".

use chrono::{DateTime, Local, Utc};
use std::sync::Arc;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time in the device's local timezone
    fn local_now(&self) -> DateTime<Local> {
        self.now().with_timezone(&Local)
    }
}

/// Real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system() -> SharedClock {
    Arc::new(SystemClock)
}
