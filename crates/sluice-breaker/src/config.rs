use crate::circuit::CircuitState;
use crate::events::BreakerEvent;
use crate::CircuitBreaker;
use sluice_core::events::{EventListeners, FnListener};
use sluice_core::{ApiError, ApiResult, ErrorKind};
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for the circuit breaker.
pub struct BreakerConfig {
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_time: Duration,
    pub(crate) half_open_max_calls: usize,
    pub(crate) excluded_kinds: HashSet<ErrorKind>,
    pub(crate) event_listeners: EventListeners<BreakerEvent>,
    pub(crate) name: String,
}

impl BreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> BreakerConfigBuilder {
        BreakerConfigBuilder::new()
    }
}

/// Builder for [`BreakerConfig`].
pub struct BreakerConfigBuilder {
    failure_threshold: u32,
    recovery_time: Duration,
    half_open_max_calls: usize,
    excluded_kinds: HashSet<ErrorKind>,
    event_listeners: EventListeners<BreakerEvent>,
    name: String,
}

impl Default for BreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - failure_threshold: 5 consecutive failures
    /// - recovery_time: 30 seconds
    /// - half_open_max_calls: 1
    /// - excluded_kinds: empty
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time: Duration::from_secs(30),
            half_open_max_calls: 1,
            excluded_kinds: HashSet::new(),
            event_listeners: EventListeners::new(),
            name: "<unnamed>".to_string(),
        }
    }

    /// Sets how many consecutive counted failures open the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets how long the circuit stays open before probing recovery.
    pub fn recovery_time(mut self, recovery_time: Duration) -> Self {
        self.recovery_time = recovery_time;
        self
    }

    /// Sets how many concurrent probes the half-open state admits.
    pub fn half_open_max_calls(mut self, max_calls: usize) -> Self {
        self.half_open_max_calls = max_calls;
        self
    }

    /// Excludes an error kind from failure counting.
    ///
    /// Excluded failures neither trip the circuit nor reset the
    /// consecutive-failure counter.
    pub fn exclude_kind(mut self, kind: ErrorKind) -> Self {
        self.excluded_kinds.insert(kind);
        self
    }

    /// Replaces the excluded-kind set wholesale.
    pub fn excluded_kinds<I: IntoIterator<Item = ErrorKind>>(mut self, kinds: I) -> Self {
        self.excluded_kinds = kinds.into_iter().collect();
        self
    }

    /// Sets the name for this breaker instance (used in events and logs).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback for state transitions, called with (from, to).
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BreakerEvent| {
                if let BreakerEvent::StateTransition {
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(*from_state, *to_state);
                }
            }));
        self
    }

    /// Registers a callback for rejected calls.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BreakerEvent| {
                if matches!(event, BreakerEvent::CallRejected { .. }) {
                    f();
                }
            }));
        self
    }

    /// Validates the configuration and builds the breaker.
    pub fn build(self) -> ApiResult<CircuitBreaker> {
        if self.failure_threshold == 0 {
            return Err(ApiError::invalid_argument(
                "failure_threshold must be at least 1",
            ));
        }
        if self.recovery_time.is_zero() {
            return Err(ApiError::invalid_argument(
                "recovery_time must be greater than zero",
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(ApiError::invalid_argument(
                "half_open_max_calls must be at least 1",
            ));
        }

        Ok(CircuitBreaker::from_config(BreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_time: self.recovery_time,
            half_open_max_calls: self.half_open_max_calls,
            excluded_kinds: self.excluded_kinds,
            event_listeners: self.event_listeners,
            name: self.name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        assert!(BreakerConfig::builder().build().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(BreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(BreakerConfig::builder()
            .recovery_time(Duration::ZERO)
            .build()
            .is_err());
        assert!(BreakerConfig::builder()
            .half_open_max_calls(0)
            .build()
            .is_err());
    }
}
