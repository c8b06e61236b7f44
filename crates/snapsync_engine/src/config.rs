//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for one sync worker.
///
/// The entity and device identity are passed in explicitly rather than read
/// from ambient globals, so multiple workers can coexist in one process.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifier of the synchronized entity (one per owning user).
    pub entity_id: String,
    /// Identifier of this device/process.
    pub device_id: String,
    /// Quiescence window after a mutation before a push is attempted.
    pub debounce: Duration,
    /// Bounded timeout applied to every network call.
    pub request_timeout: Duration,
    /// Retry configuration for transient failures.
    pub retry: RetryConfig,
    /// How many resolved conflicts to keep in the status audit log.
    pub conflict_log_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with defaults for the given identity.
    pub fn new(entity_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            device_id: device_id.into(),
            debounce: Duration::from_millis(300),
            request_timeout: Duration::from_secs(12),
            retry: RetryConfig::default(),
            conflict_log_capacity: 32,
        }
    }

    /// Sets the debounce window.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the network request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Configuration for retry behavior.
///
/// Delays grow exponentially and are capped; there is no jitter, so backoff
/// timing is deterministic.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts before the engine parks in the error
    /// state.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a retry configuration with the given attempt bound.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before the given attempt (1-indexed: attempt 1
    /// is the first retry).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SyncConfig::new("user-1", "device-a");
        assert_eq!(config.entity_id, "user-1");
        assert_eq!(config.device_id, "device-a");
        assert_eq!(config.debounce, Duration::from_millis(300));
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn config_builder() {
        let config = SyncConfig::new("user-1", "device-a")
            .with_debounce(Duration::from_millis(50))
            .with_request_timeout(Duration::from_secs(5))
            .with_retry(RetryConfig::no_retry());

        assert_eq!(config.debounce, Duration::from_millis(50));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = RetryConfig::new(5);

        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn backoff_respects_ceiling() {
        let retry = RetryConfig::new(10).with_max_delay(Duration::from_secs(5));

        assert_eq!(retry.delay_for_attempt(8), Duration::from_secs(5));
    }
}
