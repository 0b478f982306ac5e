//! Session configuration types.

use std::time::Duration;

/// Retry and polling configuration for a provisioning session
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of connect retries after the first attempt
    pub max_retries: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Delay between registration polls when the service gives no hint
    pub poll_interval: Duration,

    /// Maximum number of registration status polls
    pub max_polls: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            max_polls: 30,
        }
    }

    /// Set maximum retries
    #[must_use]
    pub const fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set initial backoff duration
    #[must_use]
    pub const fn initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff = duration;
        self
    }

    /// Set maximum backoff duration
    #[must_use]
    pub const fn max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff = duration;
        self
    }

    /// Set the default registration poll interval
    #[must_use]
    pub const fn poll_interval(mut self, duration: Duration) -> Self {
        self.poll_interval = duration;
        self
    }

    /// Set maximum registration polls
    #[must_use]
    pub const fn max_polls(mut self, max: u32) -> Self {
        self.max_polls = max;
        self
    }

    /// Calculate backoff for a given retry (0-based)
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let initial = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        let backoff = initial.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(backoff.min(max))
    }

    /// Delay before the next registration poll, honoring a server hint
    #[must_use]
    pub fn poll_delay(&self, hint: Option<Duration>) -> Duration {
        hint.unwrap_or(self.poll_interval).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let retry = RetryConfig::new()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(500));
        assert_eq!(retry.backoff_for(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(500));
        assert_eq!(retry.backoff_for(63), Duration::from_millis(500));
    }

    #[test]
    fn test_poll_delay_prefers_hint_but_caps() {
        let retry = RetryConfig::new()
            .poll_interval(Duration::from_secs(2))
            .max_backoff(Duration::from_secs(10));
        assert_eq!(retry.poll_delay(None), Duration::from_secs(2));
        assert_eq!(retry.poll_delay(Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(retry.poll_delay(Some(Duration::from_secs(60))), Duration::from_secs(10));
    }
}
