//! Step retry policy

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// How transient step failures are retried.
///
/// A step gets `max_attempts` tries in total. After attempt `n` fails the
/// next attempt is scheduled `initial_interval * backoff_coefficient^(n-1)`
/// later, capped at `max_interval` and spread by `jitter`.
///
/// ```
/// use neofeed_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_secs(2))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.backoff_after(1), Duration::from_secs(2));
/// assert_eq!(policy.backoff_after(2), Duration::from_secs(4));
/// assert!(!policy.has_attempts_remaining(4));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Fraction of the delay used as random spread (0.1 = +/-10%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// 5 attempts, 1s initial delay doubling up to 60s, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }

    /// Single attempt; every transient failure is final
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Retries become due immediately. Used by tests that drive runs by hand.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::no_retry()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after `failed_attempt` (1-based) before trying again.
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(62) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jitter_range = capped * self.jitter;
        let jittered = if jitter_range > 0.0 {
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Wall-clock time at which the attempt after `failed_attempt` becomes due.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, failed_attempt: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.backoff_after(failed_attempt))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.max_interval.as_secs() as i64));
        now + delay
    }

    pub fn has_attempts_remaining(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
