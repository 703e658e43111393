//! Reconnect backoff policy for transient channel loss.
//!
//! Delays grow exponentially per consecutive failed attempt, are capped,
//! and carry a jitter factor so a fleet of clients losing the same server
//! does not reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

/// Capped exponential backoff with jitter.
///
/// Attempt numbers are 1-based: the first reconnect after a transient close
/// is attempt 1 and waits roughly `initial_delay`.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Base delay for the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound the exponential growth is clamped to.
    pub max_delay: Duration,
    /// Growth factor applied per consecutive failure.
    pub multiplier: f64,
    /// Jitter fraction in `[0.0, 1.0]`; the final delay is drawn uniformly
    /// from `base * (1 - jitter) ..= base * (1 + jitter)`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy with the default schedule (1s initial, 30s cap,
    /// doubling, 25% jitter).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base delay for the first attempt.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction (clamped to `[0.0, 1.0]`).
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic delay for `attempt` before jitter is applied.
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, clamped to `max_delay`.
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base_ms = self.initial_delay.as_millis() as f64;
        let scaled_ms = base_ms * self.multiplier.powi(exponent.min(i32::MAX as u32) as i32);
        let capped_ms = scaled_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Delay for `attempt` with jitter applied.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let mut rng = rand::thread_rng();
        let factor = 1.0 + self.jitter * rng.gen_range(-1.0..=1.0);
        let jittered_ms = (base.as_millis() as f64 * factor).max(0.0);
        Duration::from_millis(jittered_ms as u64)
    }
}
