//! Dependency injection traits for reducers.
//!
//! All external dependencies are abstracted behind traits and injected via
//! the Environment parameter, so reducers stay deterministic under test.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Authorization deadlines and countdowns are all derived from this clock,
/// never from `Utc::now()` directly, so tests can replay deadline expiry
/// in simulated time.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
