//! Resilience utilities: retry logic, backoff, rate limiting, bulkheads.
//!
//! - [`RetryConfig`] + [`retry_until_shutdown`]: bounded exponential backoff with a
//!   per-attempt timeout that gives up early when shutdown is signalled
//! - [`RateLimiter`]: token bucket shared by all workers to prevent a thundering herd
//! - [`Bulkhead`]: semaphore bounding read-but-unacknowledged messages per worker
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), pulsar_sync::resilience::BulkheadFull> {
//! use pulsar_sync::resilience::{RateLimiter, Bulkhead, RateLimitConfig};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! limiter.acquire().await; // Blocks if over limit
//!
//! // At most 100 messages between read and acknowledge
//! let window = Bulkhead::new(100);
//! let _permit = window.acquire().await?;
//! // permit dropped = slot released
//! # Ok(())
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: usize,

    /// Initial delay before first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (ceiling for exponential backoff).
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 = double delay each retry).
    pub backoff_factor: f64,

    /// Timeout for each individual attempt.
    pub connection_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            connection_timeout: Duration::from_millis(500),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        // Past ~64 doublings every realistic config is pinned at max_delay
        let exponent = (attempt - 1).min(64) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_secs_f64(delay_secs.max(0.0)), self.max_delay)
    }
}

/// Result of [`retry_until_shutdown`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded on attempt `attempts`.
    Done { value: T, attempts: usize },
    /// Every attempt failed; `last_error` is from the final one.
    Exhausted { attempts: usize, last_error: E },
    /// Shutdown was signalled before the operation succeeded.
    Cancelled,
}

/// An attempt ran past [`RetryConfig::connection_timeout`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("attempt {attempt} exceeded {timeout:?}")]
pub struct AttemptTimedOut {
    pub attempt: usize,
    pub timeout: Duration,
}

/// Run `op` until it succeeds, the attempt budget is spent, or `shutdown` flips to `true`.
///
/// `op` receives the 1-indexed attempt number. An attempt still pending after
/// `connection_timeout` is dropped and counts as a failure. `on_retry` is called
/// with the attempt number and error before each backoff sleep.
pub async fn retry_until_shutdown<T, E, F, Fut, R>(
    config: &RetryConfig,
    shutdown: &mut watch::Receiver<bool>,
    mut op: F,
    mut on_retry: R,
) -> RetryOutcome<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<AttemptTimedOut>,
    R: FnMut(usize, &E),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if *shutdown.borrow() {
            return RetryOutcome::Cancelled;
        }
        attempt += 1;

        let err = match tokio::time::timeout(config.connection_timeout, op(attempt)).await {
            Ok(Ok(value)) => {
                return RetryOutcome::Done {
                    value,
                    attempts: attempt,
                }
            }
            Ok(Err(e)) => e,
            Err(_) => E::from(AttemptTimedOut {
                attempt,
                timeout: config.connection_timeout,
            }),
        };

        if attempt >= max_attempts {
            return RetryOutcome::Exhausted {
                attempts: attempt,
                last_error: err,
            };
        }

        on_retry(attempt, &err);

        let delay = config.delay_for_attempt(attempt);
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return RetryOutcome::Cancelled;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for rate limiting.
///
/// Uses a token bucket algorithm: tokens refill at `refill_rate` per second,
/// up to `burst_size` tokens. Each replicated message consumes one token.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    /// Default: 10k msgs/sec with burst of 1000.
    fn default() -> Self {
        Self {
            burst_size: 1000,
            refill_rate: 10_000,
        }
    }
}

/// Token bucket rate limiter shared across workers.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovLimiter::direct(quota),
            config,
        }
    }

    /// Acquire a permit, waiting until one is available.
    ///
    /// This method is cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish()
    }
}

// =============================================================================
// Bulkhead (in-flight window)
// =============================================================================

/// Error when the bulkhead has been closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead closed: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    pub max_concurrent: usize,
}

/// Limits how many operations hold a slot at once.
///
/// A worker takes a permit before each source read and releases it once the
/// message is acknowledged, so the reader can never run more than
/// `max_concurrent` messages ahead of the writer.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    ///
    /// Fails only after [`close()`](Self::close).
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }

    /// Wake every waiter with an error; later acquires fail immediately.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
