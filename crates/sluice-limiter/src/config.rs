use crate::bucket::TokenBucket;
use crate::events::LimiterEvent;
use sluice_core::events::{EventListeners, FnListener};
use sluice_core::{ApiError, ApiResult};
use std::time::Duration;

/// Configuration for a [`TokenBucket`].
#[derive(Clone)]
pub struct LimiterConfig {
    pub(crate) rate: u32,
    pub(crate) period: Duration,
    pub(crate) max_tokens: Option<u32>,
    pub(crate) name: String,
    pub(crate) event_listeners: EventListeners<LimiterEvent>,
}

impl LimiterConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::new()
    }

    pub(crate) fn validate(&self) -> ApiResult<()> {
        if self.rate == 0 {
            return Err(ApiError::invalid_argument("limiter rate must be at least 1"));
        }
        if self.period.is_zero() {
            return Err(ApiError::invalid_argument(
                "limiter period must be greater than zero",
            ));
        }
        if let Some(max) = self.max_tokens {
            if max < self.rate {
                return Err(ApiError::invalid_argument(format!(
                    "max_tokens ({max}) must be at least the rate ({})",
                    self.rate
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`LimiterConfig`].
pub struct LimiterConfigBuilder {
    rate: u32,
    period: Duration,
    max_tokens: Option<u32>,
    name: String,
    event_listeners: EventListeners<LimiterEvent>,
}

impl Default for LimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LimiterConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - rate: 50 tokens per period
    /// - period: 1 second
    /// - max_tokens: same as rate
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            rate: 50,
            period: Duration::from_secs(1),
            max_tokens: None,
            name: "<unnamed>".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets how many tokens are refilled per period.
    pub fn rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the refill period.
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets the bucket capacity.
    ///
    /// Must be at least `rate`; values above `rate` allow bursts deeper
    /// than one period's worth of tokens.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the name for this limiter instance (used in events and logs).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback for granted permits, called with the cost.
    pub fn on_permit_acquired<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &LimiterEvent| {
                if let LimiterEvent::PermitAcquired { cost, .. } = event {
                    f(*cost);
                }
            }));
        self
    }

    /// Registers a callback for deferred permits, called with the cost and
    /// the wait the caller was told to sleep.
    pub fn on_permit_deferred<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &LimiterEvent| {
                if let LimiterEvent::PermitDeferred { cost, wait, .. } = event {
                    f(*cost, *wait);
                }
            }));
        self
    }

    /// Registers a callback for rate changes, called with (old, new).
    pub fn on_rate_updated<F>(mut self, f: F) -> Self
    where
        F: Fn(f64, f64) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &LimiterEvent| {
                if let LimiterEvent::RateUpdated {
                    old_rate, new_rate, ..
                } = event
                {
                    f(*old_rate, *new_rate);
                }
            }));
        self
    }

    /// Finishes the builder as a reusable config without building a
    /// bucket, e.g. as the per-key template of an `EndpointLimiter`.
    /// Validation happens where the config is consumed.
    pub fn config(self) -> LimiterConfig {
        LimiterConfig {
            rate: self.rate,
            period: self.period,
            max_tokens: self.max_tokens,
            name: self.name,
            event_listeners: self.event_listeners,
        }
    }

    /// Validates the configuration and builds the bucket.
    ///
    /// Fails with `InvalidArgument` on a zero rate, a zero period, or a
    /// capacity below the rate.
    pub fn build(self) -> ApiResult<TokenBucket> {
        let config = self.config();
        config.validate()?;
        Ok(TokenBucket::from_config(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let bucket = LimiterConfig::builder().build().unwrap();
        assert_eq!(bucket.rate(), 50.0);
    }

    #[test]
    fn zero_rate_is_rejected() {
        let err = LimiterConfig::builder().rate(0).build().unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn zero_period_is_rejected() {
        let err = LimiterConfig::builder()
            .period(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn capacity_below_rate_is_rejected() {
        let err = LimiterConfig::builder()
            .rate(10)
            .max_tokens(5)
            .build()
            .unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }
}
