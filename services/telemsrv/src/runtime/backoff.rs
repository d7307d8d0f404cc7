//! Retry delay policy for failed polls

use std::time::Duration;

use rand::Rng;

use crate::config::PollerConfig;

/// Delay before the next attempt after consecutive poll failures.
///
/// With the default multiplier of 1.0 the delay is fixed at `initial_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added at random, 0.0 disables jitter
    pub jitter: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::from_config(&PollerConfig::default())
    }
}

impl RetryBackoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn from_config(config: &PollerConfig) -> Self {
        let initial_delay = Duration::from_millis(config.retry_delay_ms);
        Self {
            initial_delay,
            max_delay: Duration::from_millis(config.max_retry_delay_ms).max(initial_delay),
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: config.retry_jitter.clamp(0.0, 1.0),
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based)
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(30) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let mut delay = if scaled.is_finite() && scaled < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_delay
        };

        if self.jitter > 0.0 {
            let spread = delay.as_millis() as f64 * self.jitter;
            if spread >= 1.0 {
                let extra = rand::thread_rng().gen_range(0.0..spread);
                delay += Duration::from_millis(extra as u64);
            }
        }
        delay
    }
}
