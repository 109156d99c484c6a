//! Time source used by the job engine.

use chrono::{DateTime, Utc};

/// Source of the current instant.
///
/// Queue operations read the clock once and use that instant for every
/// timestamp they write.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
