//! Wall-clock abstraction
//!
//! Runner timing (heartbeats, retry delays, stuck-task detection) is all
//! expressed in wall-clock terms. A trait keeps tests from needing to
//! sleep for real seconds.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// The default implementation reads the system clock. Tests substitute a
/// [`FixedClock`] so that retry-delay and heartbeat-timeout assertions
/// don't depend on real elapsed time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that always returns a fixed instant, advanced explicitly by tests.
#[derive(Debug)]
pub struct FixedClock {
    now: parking_lot::RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::RwLock::new(now),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.write();
        *guard += delta;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
