use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// Suspension seam for backoff and inter-request pauses.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Uniformly random delay within `[min, max]`, millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        if max < min {
            Self { min: max, max: min }
        } else {
            Self { min, max }
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    pub fn sample(&self) -> Duration {
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        if hi <= lo {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    pub fn contains(&self, d: Duration) -> bool {
        d >= self.min && d <= self.max
    }
}

/// Rate-limit retry budget: up to `max_retries` retries, each preceded by
/// `base + uniform(0, jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: DelayRange,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, jitter: Duration) -> Self {
        Self {
            max_retries,
            backoff: DelayRange::new(base, base + jitter),
        }
    }

    pub fn next_delay(&self) -> Duration {
        self.backoff.sample()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(10), Duration::from_secs(5))
    }
}
