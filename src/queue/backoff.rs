use std::time::Duration;

use rand::Rng;

/// Exponential backoff between deliveries of a failed job.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Adds up to 25% random jitter on top of the computed delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(600),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay after the `attempt`-th delivery failed (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            capped * (1.0 + rand::thread_rng().gen_range(0.0..=0.25))
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }

    /// Unix second at which the job becomes eligible again. Never earlier than `now + 1`.
    pub fn next_attempt_at(&self, attempt: u32, now: i64) -> i64 {
        let delay = self.delay_for_attempt(attempt).as_secs_f64().ceil() as i64;
        now + delay.max(1)
    }
}
