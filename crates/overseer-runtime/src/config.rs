//! # Runtime Configuration
//!
//! All values have working defaults and can be overridden from the
//! environment.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OVERSEER_RETRY_ATTEMPTS` | `10` | Subsystem resolution attempts per request |
//! | `OVERSEER_RETRY_DELAY_MS` | `100` | Base delay between attempts |
//! | `OVERSEER_RETRY_MAX_DELAY_MS` | `2000` | Cap on the back-off delay |
//! | `OVERSEER_RETRY_JITTER_MS` | `100` | Upper bound of random extra delay |
//! | `OVERSEER_LOG` / `RUST_LOG` | `info` | Log filter directive |

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The router would never look a subsystem up.
    #[error("retry policy must allow at least one attempt")]
    ZeroAttempts,
}

/// How the router retries resolving a subsystem that is missing or not
/// running yet.
///
/// Delays grow exponentially from `delay`, are capped at `max_delay`, and get
/// up to `max_jitter` of random extra delay. There is no sleep after the
/// final attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Constant delay, no jitter.
    #[must_use]
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            max_delay: delay,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return backoff;
        }
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Subsystem resolution policy for the router.
    pub retry: RetryPolicy,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// missing or unparseable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let millis = |key: &str| parse::<u64>(&lookup, key).map(Duration::from_millis);

        if let Some(attempts) = parse::<u32>(&lookup, "OVERSEER_RETRY_ATTEMPTS") {
            config.retry.attempts = attempts;
        }
        if let Some(delay) = millis("OVERSEER_RETRY_DELAY_MS") {
            config.retry.delay = delay;
        }
        if let Some(max_delay) = millis("OVERSEER_RETRY_MAX_DELAY_MS") {
            config.retry.max_delay = max_delay;
        }
        if let Some(jitter) = millis("OVERSEER_RETRY_JITTER_MS") {
            config.retry.max_jitter = jitter;
        }
        if let Some(filter) = lookup("OVERSEER_LOG").or_else(|| lookup("RUST_LOG")) {
            config.log_filter = filter;
        }

        config
    }

    /// # Errors
    ///
    /// `ConfigError::ZeroAttempts` if the retry policy allows no attempts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.retry.attempts, 10);
        assert_eq!(config.retry.delay, Duration::from_millis(100));
        assert_eq!(config.log_filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("OVERSEER_RETRY_ATTEMPTS", "3"),
            ("OVERSEER_RETRY_DELAY_MS", "5"),
            ("OVERSEER_RETRY_JITTER_MS", "0"),
            ("RUST_LOG", "debug"),
        ]));
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay, Duration::from_millis(5));
        assert_eq!(config.retry.max_jitter, Duration::ZERO);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn test_overseer_log_wins_over_rust_log() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("OVERSEER_LOG", "overseer_runtime=trace"),
            ("RUST_LOG", "debug"),
        ]));
        assert_eq!(config.log_filter, "overseer_runtime=trace");
    }

    #[test]
    fn test_unparseable_value_is_ignored() {
        let config = RuntimeConfig::from_lookup(lookup(&[("OVERSEER_RETRY_ATTEMPTS", "many")]));
        assert_eq!(config.retry.attempts, 10);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = RuntimeConfig::from_lookup(lookup(&[("OVERSEER_RETRY_ATTEMPTS", "0")]));
        assert_eq!(config.validate(), Err(ConfigError::ZeroAttempts));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            attempts: 10,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(9), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            max_jitter: Duration::from_millis(5),
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1));
    }
}
