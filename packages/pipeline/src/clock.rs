//! Clock abstraction so time-based logic is deterministic in tests.
//!
//! Every component that compares timestamps takes a [`Clock`] instead of
//! calling `Utc::now()` directly. Production code uses [`SystemClock`];
//! tests use `testing::ManualClock`.

use chrono::{DateTime, Utc};

/// Supplies the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}
