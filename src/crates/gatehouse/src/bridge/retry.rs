//! Bounded retry with exponential backoff for blocking callers

use rand::Rng;
use std::time::Duration;

/// Configuration for retrying a failed operation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Delay before the second attempt
    pub initial_interval: Duration,

    /// Multiplier for the delay after each retry
    pub backoff_factor: f64,

    /// Upper bound on any single delay
    pub max_interval: Duration,

    /// Whether to scale delays by a random factor in 0.5..=1.5
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: Duration::from_millis(50),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(2),
            jitter: true,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the given failed attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt + 1 >= self.max_attempts {
            return Duration::ZERO;
        }

        let base = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval.as_secs_f64());

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts
    /// run out, sleeping the current thread between attempts
    pub fn retry_blocking<T, E, F, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !retryable(&error) || attempt + 1 >= self.max_attempts {
                        return Err(error);
                    }
                    let delay = self.calculate_delay(attempt);
                    tracing::debug!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        error,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
