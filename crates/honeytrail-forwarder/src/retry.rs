use honeytrail_core::config::ForwarderConfig;
use std::time::Duration;

/// Bounded retry schedule for event delivery
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total send attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Ceiling for any single delay
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &ForwarderConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }

    /// Retry immediately, up to `max_attempts` sends in total
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * multiplier.powi(exponent);
        let cap = self.max_backoff.as_secs_f64();

        if !secs.is_finite() || secs >= cap {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Every delay the policy may wait, in order
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|n| self.backoff_for(n)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ForwarderConfig::default())
    }
}
