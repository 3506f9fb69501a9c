//! Exponential backoff with an injectable delay
//!
//! Retry loops ask the [`BackoffPolicy`] for the next delay and hand it to a
//! [`Sleeper`]. Production uses [`TokioSleeper`]; tests inject a recorder so
//! budget exhaustion is reachable without real waiting.

use async_trait::async_trait;
use bggfinna_common::config::EnrichmentConfig;
use std::time::Duration;

/// Delay primitive
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry budget and delay growth for one unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// First delay after a "not ready" response
    pub initial_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
    /// Attempts allowed, including the first
    pub max_attempts: u32,
    /// Total wait allowed across all retries
    pub max_wait: Duration,
    /// Extra delay after a rate-limit signal without Retry-After
    pub rate_limit_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&EnrichmentConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.pending_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.pending_delay_ms)),
            max_attempts: config.max_attempts.max(1),
            max_wait: Duration::from_millis(config.max_wait_ms),
            rate_limit_delay: Duration::from_millis(config.rate_limit_delay_ms),
        }
    }

    /// Delay before the retry following `attempt` (1-based)
    ///
    /// Doubles from `initial_delay`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Running retry budget for one unit of work
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: BackoffPolicy,
    attempts: u32,
    waited: Duration,
}

impl RetryBudget {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            waited: Duration::ZERO,
        }
    }

    /// Record that an attempt is being made
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Total delay handed out so far
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Delay before the next attempt, or None when the budget is spent
    ///
    /// `extra` is added on top of the exponential delay (rate-limit waits).
    pub fn next_delay(&mut self, extra: Duration) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay_for_attempt(self.attempts) + extra;
        if self.waited + delay > self.policy.max_wait {
            return None;
        }
        self.waited += delay;
        Some(delay)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        self.policy.rate_limit_delay
    }
}
