//! Exponential backoff with jitter for startup multiplexing.

use std::time::Duration;

use rand::Rng;
use voxmux_config::MuxConfig;

/// How multiplexing is retried while a pool has no reachable server.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Default: 1 s.
    pub initial_delay: Duration,
    /// Default: 2.0.
    pub backoff_multiplier: f64,
    /// Default: 30 s.
    pub max_delay: Duration,
    /// 0 retries forever.
    pub max_attempts: u32,
    /// Applied as ±jitter to each delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
            jitter: 0.25,
        }
    }
}

impl From<&MuxConfig> for RetryPolicy {
    fn from(config: &MuxConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts,
            ..Default::default()
        }
    }
}

/// Attempt counter and next delay for one [`RetryPolicy`].
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let initial = policy.initial_delay;
        Self {
            policy,
            attempts: 0,
            current_delay: initial,
        }
    }

    /// Delay before the next attempt, or `None` once attempts ran out.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_attempts != 0 && self.attempts >= self.policy.max_attempts {
            return None;
        }

        let base = self.current_delay;
        self.attempts = self.attempts.saturating_add(1);

        let jittered = if self.policy.jitter > 0.0 {
            let factor = rand::rng()
                .random_range((1.0 - self.policy.jitter)..=(1.0 + self.policy.jitter));
            base.mul_f64(factor)
        } else {
            base
        };

        let next = self.current_delay.mul_f64(self.policy.backoff_multiplier);
        self.current_delay = next.min(self.policy.max_delay);

        Some(jittered.min(self.policy.max_delay))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
