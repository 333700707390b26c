//! Retry utilities with configurable backoff and jitter strategies.
//!
//! Used in two places: per-key requeue backoff in the work queue, and
//! bounded in-place retries of optimistic-concurrency writes. Retries are
//! always explicit and the retry predicate is supplied by the caller.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Doubles with every attempt.
    #[default]
    Exponential,
    /// Grows by the base delay with every attempt.
    Linear,
    /// Always the base delay.
    Constant,
}

impl BackoffStrategy {
    /// Returns the un-jittered delay of the zero-based `attempt`, capped at
    /// `max_ms`.
    #[must_use]
    pub fn delay_ms(self, base_ms: u64, attempt: usize, max_ms: u64) -> u64 {
        let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
        let delay = match self {
            Self::Exponential => base_ms.saturating_mul(2u64.saturating_pow(attempt)),
            Self::Linear => base_ms.saturating_mul(u64::from(attempt).saturating_add(1)),
            Self::Constant => base_ms,
        };
        delay.min(max_ms)
    }
}

/// How a computed delay is randomized so that many Stages failing together
/// do not retry in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the delay as computed.
    None,
    /// Anywhere in `0..=delay`.
    #[default]
    Full,
    /// In `delay/2..=delay`.
    Equal,
    /// In `base..=previous*3`, capped.
    Decorrelated,
}

impl JitterStrategy {
    fn apply(self, delay: u64, base: u64, max: u64, previous: Option<u64>) -> u64 {
        let mut rng = rand::thread_rng();
        match self {
            Self::None => delay,
            Self::Full if delay == 0 => 0,
            Self::Full => rng.gen_range(0..=delay),
            Self::Equal if delay < 2 => delay,
            Self::Equal => delay / 2 + rng.gen_range(0..=delay / 2),
            Self::Decorrelated => {
                let upper = previous.unwrap_or(base).saturating_mul(3).min(max);
                if upper <= base {
                    base
                } else {
                    rng.gen_range(base..=upper)
                }
            }
        }
    }
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    1_000_000
}

/// Backoff settings shared by the work queue and in-place write retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts allowed for in-place retries, the first one included.
    /// The work queue never gives up and ignores this.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound of any delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Delay growth.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Delay randomization.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_strategy: BackoffStrategy::default(),
            jitter_strategy: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Same as [`RetryConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backoff used when requeueing a failed Stage: 5ms doubling up to
    /// roughly 16 minutes.
    #[must_use]
    pub fn requeue() -> Self {
        Self::default().with_jitter(JitterStrategy::Equal)
    }

    /// Bounded retry for optimistic-concurrency writes.
    #[must_use]
    pub fn conflict() -> Self {
        Self::default().with_base_delay_ms(10).with_max_delay_ms(1_000)
    }

    /// Overrides `max_attempts`.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Overrides `base_delay_ms`.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Overrides `max_delay_ms`.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Overrides the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Overrides the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Returns the jittered delay before retrying after the zero-based
    /// `attempt` failed.
    #[must_use]
    pub fn delay_after(&self, attempt: usize, previous_ms: Option<u64>) -> Duration {
        let delay = self
            .backoff_strategy
            .delay_ms(self.base_delay_ms, attempt, self.max_delay_ms);
        Duration::from_millis(self.jitter_strategy.apply(
            delay,
            self.base_delay_ms,
            self.max_delay_ms,
            previous_ms,
        ))
    }
}

/// Progress of one retried operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Failed attempts so far.
    pub attempt: usize,
    last_delay_ms: Option<u64>,
}

impl RetryState {
    /// A state with no failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure and returns the delay before the next attempt, or
    /// `None` once `max_attempts` have been made.
    pub fn next_delay(&mut self, config: &RetryConfig) -> Option<Duration> {
        if self.attempt + 1 >= config.max_attempts {
            return None;
        }
        let delay = config.delay_after(self.attempt, self.last_delay_ms);
        self.last_delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self.attempt += 1;
        Some(delay)
    }
}

/// Runs `operation`, retrying only errors accepted by `retryable`.
///
/// `key` names the retried object in logs.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    key: &str,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut state = RetryState::new();
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !retryable(&err) {
            return Err(err);
        }
        let Some(delay) = state.next_delay(config) else {
            debug!(key, attempts = state.attempt + 1, error = %err, "Giving up");
            return Err(err);
        };
        debug!(
            key,
            attempt = state.attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
