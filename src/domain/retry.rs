//! Retry policy, clock and jitter sources for the market data fetcher.
//!
//! Backoff for retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
//! `max_delay`, raised to the provider's retry-after hint if one was given,
//! plus up to `jitter_ratio * delay` of random jitter.

use crate::domain::error::FetchError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
    /// Budget for one `fetch` call, sleeps included.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.25,
            deadline: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1 = first retry), jitter excluded.
    pub fn backoff(&self, retry: u32, error: &FetchError) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        match error {
            FetchError::RateLimited {
                retry_after_secs: Some(secs),
            } => delay.max(Duration::from_secs(*secs)),
            _ => delay,
        }
    }

    pub fn delay_with_jitter(&self, retry: u32, error: &FetchError, jitter: &dyn Jitter) -> Duration {
        let delay = self.backoff(retry, error);
        let spread = delay.mul_f64(self.jitter_ratio.clamp(0.0, 1.0));
        delay + jitter.jitter(spread)
    }
}

/// Wall clock plus sleeping, injectable so retry timing can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Source of random extra delay in `[0, max]`.
pub trait Jitter: Send + Sync {
    fn jitter(&self, max: Duration) -> Duration;
}

pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

pub struct NoJitter;

impl Jitter for NoJitter {
    fn jitter(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }
}
