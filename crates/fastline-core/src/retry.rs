//! Bounded retry with exponential backoff.
//!
//! Every remote write in the engine goes through a [`RetryPolicy`]. Waiting
//! between attempts is delegated to a [`Sleeper`], so a backoff only suspends
//! the calling future and tests can observe the exact delays.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::classify;
use crate::error::StoreError;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `min(base_delay * backoff_multiplier^(attempt-1), max_delay)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.max_delay.as_millis() as f64;
        let ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if !ms.is_finite() || ms >= max_ms {
            return self.max_delay;
        }
        Duration::from_millis(ms.max(0.0).round() as u64)
    }
}

/// Non-blocking wait used between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .map(|w| w.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        match self.waits.lock() {
            Ok(mut waits) => waits.push(duration),
            Err(poisoned) => poisoned.into_inner().push(duration),
        }
    }
}

/// Decides whether an error is worth another attempt. Receives the 1-based
/// number of the attempt that just failed.
pub type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;

/// Per-operation bookkeeping; lives only for one `run` call.
#[derive(Debug, Default)]
struct RetryState {
    attempt: u32,
    next_delay: Duration,
}

pub struct RetryPolicy<E> {
    config: RetryConfig,
    is_retryable: RetryPredicate<E>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            is_retryable: Arc::clone(&self.is_retryable),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy<StoreError> {
    /// Policy for session store calls using the default retry predicate.
    pub fn for_store(config: RetryConfig) -> Self {
        Self::new(config, classify::is_retryable)
    }
}

impl<E: fmt::Display> RetryPolicy<E> {
    pub fn new(config: RetryConfig, is_retryable: impl Fn(&E, u32) -> bool + Send + Sync + 'static) -> Self {
        Self {
            config,
            is_retryable: Arc::new(is_retryable),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = RetryState::default();

        loop {
            state.attempt += 1;
            match op().await {
                Ok(value) => {
                    if state.attempt > 1 {
                        debug!(operation, attempt = state.attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !(self.is_retryable)(&err, state.attempt) {
                        debug!(operation, attempt = state.attempt, error = %err, "not retryable");
                        return Err(err);
                    }
                    if state.attempt >= max_attempts {
                        warn!(operation, attempts = state.attempt, error = %err, "retries exhausted");
                        return Err(err);
                    }
                    state.next_delay = self.config.delay_for_attempt(state.attempt);
                    debug!(
                        operation,
                        attempt = state.attempt,
                        delay_ms = state.next_delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );
                    self.sleeper.sleep(state.next_delay).await;
                }
            }
        }
    }
}
