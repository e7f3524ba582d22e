//! Back-off schedule for failed tile loads

use std::time::Duration;

use crate::core::config::PlanetConfig;

/// Exponential back-off capped at `max_delay`, giving up after `max_attempts`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PlanetConfig) -> Self {
        Self {
            max_attempts: config.max_load_attempts,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Delay before the next try after `attempts` failures, `None` once the
    /// budget is spent.
    pub fn delay_after(&self, attempts: u32) -> Option<Duration> {
        if attempts == 0 {
            return Some(Duration::ZERO);
        }
        if attempts >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PlanetConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_after(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_after(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_after(6), None);
    }

    #[test]
    fn test_default_gives_up_after_three() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_after(2).is_some());
        assert_eq!(policy.delay_after(3), None);
    }
}
