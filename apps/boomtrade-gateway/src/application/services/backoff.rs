//! Backoff Policy
//!
//! Exponential backoff with jitter, parameterized by (base, cap,
//! max-attempts). The supervisor uses it to pace gateway restarts, the
//! facade uses a single-attempt instance for its implicit retry, and the
//! push feed uses it between reconnects.

use std::time::Duration;

use rand::Rng;

/// Configuration for backoff behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base: Duration,
    /// Maximum delay between retries.
    pub cap: Duration,
    /// Multiplier for exponential backoff (2.0 doubles the delay each attempt).
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of retries (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Create a doubling configuration with ±10% jitter.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts,
        }
    }

    /// Replace the jitter factor.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }
}

/// Backoff policy implementing exponential backoff with jitter.
///
/// # Example
///
/// ```rust
/// use boomtrade_gateway::application::services::backoff::{BackoffConfig, BackoffPolicy};
/// use std::time::Duration;
///
/// let config = BackoffConfig::new(Duration::from_secs(5), Duration::from_secs(60), 3)
///     .with_jitter(0.0);
/// let mut policy = BackoffPolicy::new(config);
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(10)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(20)));
/// assert_eq!(policy.next_delay(), None);
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl BackoffPolicy {
    /// Create a new backoff policy.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let base = config.base;
        Self {
            config,
            current_delay: base,
            attempt_count: 0,
        }
    }

    /// Get the next delay duration, applying exponential backoff with jitter.
    ///
    /// Returns `None` once max attempts have been used up.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;

        let delay_with_jitter = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.cap.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay_with_jitter)
    }

    /// Reset the policy after a success.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.base;
        self.attempt_count = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// The policy configuration.
    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor_config() -> BackoffConfig {
        BackoffConfig::new(Duration::from_secs(5), Duration::from_secs(60), 0).with_jitter(0.0)
    }

    #[test]
    fn default_config_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.base, Duration::from_secs(5));
        assert_eq!(config.cap, Duration::from_secs(60));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn restart_schedule_doubles_then_caps() {
        let mut policy = BackoffPolicy::new(supervisor_config());
        let delays: Vec<u64> = (0..8)
            .map(|_| policy.next_delay().unwrap().as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60, 60]);
    }

    #[test]
    fn max_attempts_exhausts() {
        let config =
            BackoffConfig::new(Duration::from_millis(100), Duration::from_secs(1), 2).with_jitter(0.0);
        let mut policy = BackoffPolicy::new(config);

        assert!(policy.next_delay().is_some());
        assert!(policy.should_retry());
        assert!(policy.next_delay().is_some());
        assert!(!policy.should_retry());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 2);
    }

    #[test]
    fn single_retry_policy() {
        let config = BackoffConfig::new(Duration::from_millis(250), Duration::from_millis(250), 1)
            .with_jitter(0.0);
        let mut policy = BackoffPolicy::new(config);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn reset_restores_base() {
        let mut policy = BackoffPolicy::new(supervisor_config());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn jitter_stays_within_range() {
        let config = BackoffConfig::new(Duration::from_secs(10), Duration::from_secs(60), 0);
        for _ in 0..100 {
            let mut policy = BackoffPolicy::new(config.clone());
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((9_000..=11_000).contains(&millis), "delay {millis}ms out of range");
        }
    }
}
