//! Configuration for domains, persistence and remote-call retries.

use rand::Rng;
use storesync_storage::StorageScope;
use std::time::Duration;

/// How a coordinator handles overlapping writes on one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// One operation at a time; later calls wait their turn in call order.
    #[default]
    Serialized,
    /// Operations may overlap.
    ///
    /// Each operation captures its rollback point when it starts, so a failed
    /// earlier operation can roll back over data a later one has since
    /// written. Only use this with a single-writer caller.
    Overlapping,
}

/// Configuration for one domain coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Domain name, attached to every emitted event.
    pub domain: String,
    /// Overlapping-write policy.
    pub write_policy: WritePolicy,
}

impl CoordinatorConfig {
    /// Creates a configuration for the named domain.
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            write_policy: WritePolicy::default(),
        }
    }

    /// Sets the write policy.
    #[must_use]
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }
}

/// Where a container mirrors its snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Caller-chosen key, unique per domain within a scope.
    pub key: String,
    /// Storage scope.
    pub scope: StorageScope,
}

impl PersistenceConfig {
    /// Creates a persistence configuration.
    pub fn new(key: impl Into<String>, scope: StorageScope) -> Self {
        Self {
            key: key.into(),
            scope,
        }
    }

    /// Persist to durable local storage.
    pub fn local(key: impl Into<String>) -> Self {
        Self::new(key, StorageScope::Local)
    }

    /// Persist for the session.
    pub fn session(key: impl Into<String>) -> Self {
        Self::new(key, StorageScope::Session)
    }

    /// Returns the key used inside the backend.
    pub fn storage_key(&self) -> String {
        self.scope.qualify(&self.key)
    }
}

/// Configuration for retrying remote calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
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

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // A negative multiplier flips the sign on odd exponents.
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_builder() {
        let config = CoordinatorConfig::new("cart");
        assert_eq!(config.domain, "cart");
        assert_eq!(config.write_policy, WritePolicy::Serialized);

        let config = config.with_write_policy(WritePolicy::Overlapping);
        assert_eq!(config.write_policy, WritePolicy::Overlapping);
    }

    #[test]
    fn persistence_storage_key() {
        assert_eq!(PersistenceConfig::local("cart").storage_key(), "local/cart");
        assert_eq!(
            PersistenceConfig::session("wishlist").storage_key(),
            "session/wishlist"
        );
    }

    #[test]
    fn negative_multiplier_never_yields_negative_delay() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(10))
            .with_backoff_multiplier(-2.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(2), Duration::ZERO);
        assert!(!config.delay_for_attempt(3).is_zero());
        assert_eq!(config.with_jitter(true).delay_for_attempt(4), Duration::ZERO);
    }

    #[test]
    fn retry_config_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_without_jitter_is_exact() {
        let config = RetryConfig::new(4)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(40));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        let delay = config.delay_for_attempt(5);
        assert!(delay <= Duration::from_millis(6250));
    }
}
