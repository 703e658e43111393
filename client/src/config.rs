//! Client configuration.
//!
//! Every knob has a default suitable for local development and can be
//! overridden through `WAITROOM_*` environment variables.

use crate::reconnect::ReconnectPolicy;
use std::time::Duration;

/// Reconnect schedule knobs, kept as plain numbers so they can come from
/// the environment; [`ReconnectConfig::policy`] builds the runtime policy.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectConfig {
    /// Base delay before the first reconnect attempt, in milliseconds.
    pub initial_delay_ms: u64,
    /// Cap on the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Jitter fraction in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    /// Build the runtime backoff policy from these knobs.
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new()
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter)
    }
}

/// Top-level client configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitroomConfig {
    /// Base URL of the REST backend, e.g. `https://queue.example.com/`.
    pub api_base_url: String,
    /// Base URL of the real-time channel, e.g. `wss://queue.example.com/`.
    pub ws_base_url: String,
    /// How long a join/resume/leave call may take end to end, in seconds.
    pub call_timeout_secs: u64,
    /// How long a channel connect attempt may take, in seconds.
    pub connect_timeout_secs: u64,
    /// Countdown tick interval, in milliseconds.
    pub tick_interval_ms: u64,
    /// Reconnect backoff schedule.
    pub reconnect: ReconnectConfig,
}

impl Default for WaitroomConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/".to_string(),
            ws_base_url: "ws://localhost:8080/".to_string(),
            call_timeout_secs: 10,
            connect_timeout_secs: 10,
            tick_interval_ms: 1_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl WaitroomConfig {
    /// Load configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    ///
    /// Recognized variables:
    /// - `WAITROOM_API_URL`
    /// - `WAITROOM_WS_URL`
    /// - `WAITROOM_CALL_TIMEOUT_SECS`
    /// - `WAITROOM_CONNECT_TIMEOUT_SECS`
    /// - `WAITROOM_TICK_INTERVAL_MS`
    /// - `WAITROOM_RECONNECT_INITIAL_MS`
    /// - `WAITROOM_RECONNECT_MAX_MS`
    /// - `WAITROOM_RECONNECT_MULTIPLIER`
    /// - `WAITROOM_RECONNECT_JITTER`
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base_url: env_or("WAITROOM_API_URL", defaults.api_base_url),
            ws_base_url: env_or("WAITROOM_WS_URL", defaults.ws_base_url),
            call_timeout_secs: env_parsed("WAITROOM_CALL_TIMEOUT_SECS", defaults.call_timeout_secs),
            connect_timeout_secs: env_parsed(
                "WAITROOM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            tick_interval_ms: env_parsed("WAITROOM_TICK_INTERVAL_MS", defaults.tick_interval_ms),
            reconnect: ReconnectConfig {
                initial_delay_ms: env_parsed(
                    "WAITROOM_RECONNECT_INITIAL_MS",
                    defaults.reconnect.initial_delay_ms,
                ),
                max_delay_ms: env_parsed(
                    "WAITROOM_RECONNECT_MAX_MS",
                    defaults.reconnect.max_delay_ms,
                ),
                multiplier: env_parsed(
                    "WAITROOM_RECONNECT_MULTIPLIER",
                    defaults.reconnect.multiplier,
                ),
                jitter: env_parsed("WAITROOM_RECONNECT_JITTER", defaults.reconnect.jitter),
            },
        }
    }

    /// Call timeout as a [`Duration`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Tick interval as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = WaitroomConfig::default();
        assert_eq!(config.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.tick_interval(), Duration::from_millis(1_000));
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
    }

    #[test]
    fn reconnect_config_builds_matching_policy() {
        let config = ReconnectConfig {
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            multiplier: 3.0,
            jitter: 0.0,
        };
        let policy = config.policy();
        assert_eq!(policy.base_delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.base_delay_for_attempt(2), Duration::from_millis(1_500));
        assert_eq!(policy.base_delay_for_attempt(5), Duration::from_secs(5));
    }
}
