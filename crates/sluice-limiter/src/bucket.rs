use crate::config::LimiterConfig;
use crate::events::LimiterEvent;
use sluice_core::{ApiError, ApiResult};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Mutable bucket state, guarded by a single mutex.
///
/// The rate lives here rather than in the config because the adaptive
/// limiter adjusts it at runtime.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl BucketState {
    /// Credits tokens for the time elapsed since the last refill, capped
    /// at the bucket capacity. A repeated call under the same clock
    /// reading credits nothing.
    fn refill(&mut self, period: Duration, max_tokens: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        if !elapsed.is_zero() {
            let credit = elapsed.as_secs_f64() * self.rate / period.as_secs_f64();
            self.tokens = (self.tokens + credit).min(max_tokens);
            self.last_refill = now;
        }
    }
}

/// A token-bucket rate limiter.
///
/// The bucket starts empty and is credited continuously at `rate` per
/// `period`, up to the capacity; burst allowance is therefore earned by
/// idle time rather than granted up front. Each grant debits the
/// requested cost. Fractional tokens accumulate internally; the public
/// cost is an integer of at least 1.
///
/// State is serialized by one mutex around the refill-and-decide critical
/// section. Waiters sleep outside the lock and re-contend, so fairness
/// among waiters is whatever the mutex provides.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    period: Duration,
    max_tokens: f64,
    original_rate: f64,
    config: LimiterConfig,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("name", &self.config.name)
            .field("period", &self.period)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl TokenBucket {
    pub(crate) fn from_config(config: LimiterConfig) -> Self {
        let rate = f64::from(config.rate);
        let max_tokens = config.max_tokens.map_or(rate, f64::from);
        Self {
            state: Mutex::new(BucketState {
                tokens: 0.0,
                rate,
                last_refill: Instant::now(),
            }),
            period: config.period,
            max_tokens,
            original_rate: rate,
            config,
        }
    }

    /// Attempts to debit `cost` tokens without waiting.
    ///
    /// Returns `Duration::ZERO` when the tokens were debited, or the exact
    /// wait after which the deficit will have refilled. A non-zero return
    /// debits nothing; the caller sleeps and retries.
    pub fn try_acquire(&self, cost: u32) -> ApiResult<Duration> {
        if cost == 0 {
            return Err(ApiError::invalid_argument("token cost must be at least 1"));
        }
        let need = f64::from(cost);
        if need > self.max_tokens {
            return Err(ApiError::invalid_argument(format!(
                "token cost {cost} exceeds bucket capacity {}",
                self.max_tokens
            )));
        }

        let (wait, event) = {
            let mut state = self.state.lock().unwrap();
            state.refill(self.period, self.max_tokens);
            if state.tokens >= need {
                state.tokens -= need;
                let event = LimiterEvent::PermitAcquired {
                    source: self.config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    cost,
                };
                (Duration::ZERO, event)
            } else {
                let deficit = need - state.tokens;
                let wait =
                    Duration::from_secs_f64(deficit * self.period.as_secs_f64() / state.rate);
                let event = LimiterEvent::PermitDeferred {
                    source: self.config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    cost,
                    wait,
                };
                (wait, event)
            }
        };

        #[cfg(feature = "metrics")]
        {
            let outcome = if wait.is_zero() { "acquired" } else { "deferred" };
            metrics::counter!(
                "sluice_limiter_permits_total",
                "limiter" => self.config.name.clone(),
                "outcome" => outcome
            )
            .increment(1);
        }

        if wait.is_zero() {
            tracing::trace!(limiter = %self.config.name, cost, "permit acquired");
        } else {
            tracing::debug!(limiter = %self.config.name, cost, wait_ms = wait.as_millis() as u64, "permit deferred");
        }
        self.config.event_listeners.emit(&event);
        Ok(wait)
    }

    /// Debits `cost` tokens, sleeping as long as the bucket directs.
    ///
    /// Dropping the returned future while it sleeps consumes nothing:
    /// tokens are only debited at the moment of a successful grant, so no
    /// refund bookkeeping is needed on cancellation.
    pub async fn acquire(&self, cost: u32) -> ApiResult<()> {
        loop {
            let wait = self.try_acquire(cost)?;
            if wait.is_zero() {
                return Ok(());
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Acquires `cost` tokens, then runs `f` and returns its output.
    pub async fn execute<F, Fut, T>(&self, cost: u32, f: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire(cost).await?;
        Ok(f().await)
    }

    /// Replaces the refill rate, keeping accumulated tokens.
    ///
    /// Elapsed time is credited under the old rate first, so the change
    /// only affects refills from this instant on.
    pub fn set_rate(&self, rate: f64) -> ApiResult<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ApiError::invalid_argument(format!(
                "refill rate must be positive and finite, got {rate}"
            )));
        }
        let old_rate = {
            let mut state = self.state.lock().unwrap();
            state.refill(self.period, self.max_tokens);
            std::mem::replace(&mut state.rate, rate)
        };

        tracing::info!(limiter = %self.config.name, old_rate, new_rate = rate, "refill rate updated");
        self.config.event_listeners.emit(&LimiterEvent::RateUpdated {
            source: self.config.name.clone(),
            timestamp: std::time::Instant::now(),
            old_rate,
            new_rate: rate,
        });
        Ok(())
    }

    /// Current token count, after crediting elapsed time.
    pub fn tokens(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        state.refill(self.period, self.max_tokens);
        state.tokens
    }

    /// Current refill rate in tokens per period.
    pub fn rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }

    /// The rate this bucket was originally configured with.
    pub fn original_rate(&self) -> f64 {
        self.original_rate
    }

    /// The bucket capacity.
    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    /// The refill period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;

    fn bucket(rate: u32) -> TokenBucket {
        LimiterConfig::builder()
            .rate(rate)
            .period(Duration::from_secs(1))
            .name("test")
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn starts_empty_and_debits_exactly() {
        let b = bucket(10);
        assert_eq!(b.tokens(), 0.0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(b.tokens(), 10.0);
        assert_eq!(b.try_acquire(3).unwrap(), Duration::ZERO);
        assert_eq!(b.tokens(), 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn deficit_wait_is_proportional() {
        let b = bucket(2);

        // Empty bucket: one token refills in half the period.
        let wait = b.try_acquire(1).unwrap();
        assert_eq!(wait, Duration::from_millis(500));
        // The deferred attempt debited nothing.
        let again = b.try_acquire(1).unwrap();
        assert_eq!(again, Duration::from_millis(500));

        // Half of the deficit refilled: half the wait remains.
        tokio::time::advance(Duration::from_millis(250)).await;
        let shorter = b.try_acquire(1).unwrap();
        assert_eq!(shorter, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn zero_cost_is_rejected() {
        let b = bucket(5);
        let err = b.try_acquire(0).unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn cost_above_capacity_is_rejected() {
        let b = bucket(5);
        let err = b.try_acquire(6).unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time_up_to_capacity() {
        let b = bucket(4);
        assert_eq!(b.tokens(), 0.0);

        tokio::time::advance(Duration::from_millis(500)).await;
        let tokens = b.tokens();
        assert!((tokens - 2.0).abs() < 1e-6, "expected ~2 tokens, got {tokens}");

        // Far more than one period only fills to capacity.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(b.tokens(), 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_waits_out_an_empty_bucket() {
        let b = bucket(2);

        let start = Instant::now();
        let out = b.execute(1, || async { 7 }).await.unwrap();
        assert_eq!(out, 7);
        assert!(start.elapsed() >= Duration::from_millis(450));
    }

    #[tokio::test]
    async fn set_rate_validates() {
        let b = bucket(2);
        assert!(b.set_rate(0.0).is_err());
        assert!(b.set_rate(f64::NAN).is_err());
        b.set_rate(8.0).unwrap();
        assert_eq!(b.rate(), 8.0);
        assert_eq!(b.original_rate(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_never_exceed_capacity_nor_go_negative() {
        let b = LimiterConfig::builder()
            .rate(3)
            .max_tokens(5)
            .build()
            .unwrap();
        for _ in 0..20 {
            let _ = b.try_acquire(2);
            tokio::time::advance(Duration::from_millis(130)).await;
            let t = b.tokens();
            assert!((0.0..=5.0).contains(&t), "tokens out of range: {t}");
        }
    }
}
