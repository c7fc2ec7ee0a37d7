//! Retry with exponential backoff and jitter.
//!
//! [`RetryPolicy`] is a pure configuration value: cloning it is cheap and
//! running it holds no state beyond the call in flight. Which errors are
//! retried is decided by [`ErrorKind`] sets; excluded kinds are re-raised
//! untouched before the retry set is even consulted.
//!
//! # Example
//!
//! ```rust
//! use sluice_retry::RetryPolicy;
//! use sluice_core::ApiError;
//! use std::time::Duration;
//!
//! # async fn example() -> sluice_core::ApiResult<()> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(4)
//!     .base_delay(Duration::from_millis(250))
//!     .max_delay(Duration::from_secs(30))
//!     .name("anthropic")
//!     .build()?;
//!
//! let response = policy
//!     .run(|| async { Ok::<_, ApiError>("hello") })
//!     .await?;
//! assert_eq!(response, "hello");
//! # Ok(())
//! # }
//! ```
//!
//! # Backoff
//!
//! The delay starts at `base_delay` and multiplies by `backoff_factor`
//! after each attempt, capped at `max_delay`. With jitter enabled the
//! slept delay is drawn uniformly from `delay · [1−jitter_factor,
//! 1+jitter_factor]`, which spreads out synchronized retry storms. A
//! provider `Retry-After` hint on the error replaces the computed delay
//! for that round when it fits under `max_delay`.
//!
//! # Cancellation
//!
//! Dropping the future returned by [`RetryPolicy::run`] during a backoff
//! sleep abandons the retry without invoking the operation again.

mod events;

pub use events::RetryEvent;

use rand::Rng;
use sluice_core::events::{EventListeners, FnListener};
use sluice_core::{ApiError, ApiResult, ErrorKind};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

/// A retry policy: which errors to retry, how often, and how long to wait
/// between attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    jitter_factor: f64,
    retry_kinds: HashSet<ErrorKind>,
    exclude_kinds: HashSet<ErrorKind>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Creates a new policy builder.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Runs `f`, retrying per the policy.
    pub async fn run<T, F, Fut>(&self, mut f: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        self.run_with(|_attempt| f()).await
    }

    /// Runs `f`, retrying per the policy; `f` receives the zero-based
    /// attempt index so callers can record attempt counts.
    pub async fn run_with<T, F, Fut>(&self, mut f: F) -> ApiResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.base_delay;

        loop {
            match f(attempt).await {
                Ok(value) => {
                    self.event_listeners.emit(&RetryEvent::Success {
                        source: self.name.clone(),
                        timestamp: std::time::Instant::now(),
                        attempts: attempt + 1,
                    });

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "sluice_retry_calls_total",
                        "policy" => self.name.clone(),
                        "outcome" => "success"
                    )
                    .increment(1);

                    return Ok(value);
                }
                Err(err) => {
                    if self.exclude_kinds.contains(&err.kind)
                        || !self.retry_kinds.contains(&err.kind)
                    {
                        self.event_listeners.emit(&RetryEvent::IgnoredError {
                            source: self.name.clone(),
                            timestamp: std::time::Instant::now(),
                        });
                        tracing::debug!(
                            policy = %self.name,
                            kind = err.kind.as_str(),
                            "error not retryable, re-raising"
                        );
                        return Err(err);
                    }
                    if attempt >= self.max_retries {
                        self.event_listeners.emit(&RetryEvent::Exhausted {
                            source: self.name.clone(),
                            timestamp: std::time::Instant::now(),
                            attempts: attempt + 1,
                        });
                        tracing::warn!(
                            policy = %self.name,
                            attempts = attempt + 1,
                            kind = err.kind.as_str(),
                            "retries exhausted"
                        );

                        #[cfg(feature = "metrics")]
                        metrics::counter!(
                            "sluice_retry_calls_total",
                            "policy" => self.name.clone(),
                            "outcome" => "exhausted"
                        )
                        .increment(1);

                        return Err(err);
                    }

                    let effective = self.effective_delay(delay, &err);
                    self.event_listeners.emit(&RetryEvent::Retry {
                        source: self.name.clone(),
                        timestamp: std::time::Instant::now(),
                        attempt: attempt + 1,
                        delay: effective,
                    });
                    tracing::debug!(
                        policy = %self.name,
                        attempt = attempt + 1,
                        delay_ms = effective.as_millis() as u64,
                        kind = err.kind.as_str(),
                        "retrying after backoff"
                    );

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "sluice_retry_attempts_total",
                        "policy" => self.name.clone()
                    )
                    .increment(1);

                    tokio::time::sleep(effective).await;
                    attempt += 1;
                    delay = next_delay(delay, self.backoff_factor, self.max_delay);
                }
            }
        }
    }

    /// The delay to sleep before the next attempt: jittered, capped, and
    /// overridden by a usable provider hint.
    fn effective_delay(&self, delay: Duration, err: &ApiError) -> Duration {
        if let Some(hint) = err.retry_after {
            if hint <= self.max_delay {
                return hint;
            }
        }

        let jittered = if self.jitter {
            let spread = rand::rng().random_range(
                (1.0 - self.jitter_factor)..=(1.0 + self.jitter_factor),
            );
            delay.mul_f64(spread)
        } else {
            delay
        };
        jittered.min(self.max_delay)
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

fn next_delay(delay: Duration, factor: f64, max_delay: Duration) -> Duration {
    delay.mul_f64(factor).min(max_delay)
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter: bool,
    jitter_factor: f64,
    retry_kinds: HashSet<ErrorKind>,
    exclude_kinds: HashSet<ErrorKind>,
    event_listeners: EventListeners<RetryEvent>,
    name: String,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - max_retries: 3
    /// - base_delay: 1 second
    /// - max_delay: 60 seconds
    /// - backoff_factor: 2.0
    /// - jitter: enabled, factor 0.2
    /// - retried kinds: Transport, Timeout, RateLimit, Server
    /// - excluded kinds: Auth, NotFound, BadRequest
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            jitter: true,
            jitter_factor: 0.2,
            retry_kinds: ErrorKind::default_retry_set(),
            exclude_kinds: ErrorKind::default_exclude_set(),
            event_listeners: EventListeners::new(),
            name: "<unnamed>".to_string(),
        }
    }

    /// Sets how many times a failed call is retried after the first
    /// attempt. Zero means invoke exactly once.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the ceiling no computed or hinted delay exceeds.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier applied to the delay after each retry.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Enables or disables jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the jitter spread: the slept delay is drawn from
    /// `delay · [1−factor, 1+factor]`.
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Replaces the set of error kinds that are retried.
    pub fn retry_kinds<I: IntoIterator<Item = ErrorKind>>(mut self, kinds: I) -> Self {
        self.retry_kinds = kinds.into_iter().collect();
        self
    }

    /// Replaces the set of error kinds that are re-raised unmodified.
    pub fn exclude_kinds<I: IntoIterator<Item = ErrorKind>>(mut self, kinds: I) -> Self {
        self.exclude_kinds = kinds.into_iter().collect();
        self
    }

    /// Sets the name for this policy instance (used in events and logs).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback before each backoff sleep, called with the
    /// attempt number and the delay about to be slept.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::Retry { attempt, delay, .. } = event {
                    f(*attempt, *delay);
                }
            }));
        self
    }

    /// Registers a callback when retries are exhausted, called with the
    /// total number of attempts.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &RetryEvent| {
                if let RetryEvent::Exhausted { attempts, .. } = event {
                    f(*attempts);
                }
            }));
        self
    }

    /// Validates the configuration and builds the policy.
    pub fn build(self) -> ApiResult<RetryPolicy> {
        if self.max_delay < self.base_delay {
            return Err(ApiError::invalid_argument(format!(
                "max_delay ({:?}) must be at least base_delay ({:?})",
                self.max_delay, self.base_delay
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ApiError::invalid_argument(format!(
                "backoff_factor must be at least 1, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ApiError::invalid_argument(format!(
                "jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }

        Ok(RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
            jitter_factor: self.jitter_factor,
            retry_kinds: self.retry_kinds,
            exclude_kinds: self.exclude_kinds,
            event_listeners: self.event_listeners,
            name: self.name,
        })
    }
}
