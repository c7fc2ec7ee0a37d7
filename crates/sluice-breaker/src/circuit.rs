use crate::config::BreakerConfig;
use crate::events::BreakerEvent;
use tokio::time::Instant;

/// Represents the state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass; consecutive failures are counted.
    Closed,
    /// Requests are rejected without touching the downstream.
    Open,
    /// A bounded number of probe requests test recovery.
    HalfOpen,
}

impl CircuitState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        }
    }
}

/// Point-in-time view of the breaker's internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive counted failures while Closed.
    pub consecutive_failures: u32,
    /// Probes currently in flight while HalfOpen.
    pub half_open_in_flight: usize,
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdmitOutcome {
    pub admitted: bool,
    /// The admission occupies a half-open probe slot.
    pub half_open: bool,
}

/// The breaker state machine. All methods run under the owning mutex, so
/// a state read and the transition it triggers are one atomic step.
pub(crate) struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    half_open_in_flight: usize,
}

impl Circuit {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            half_open_in_flight: 0,
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            half_open_in_flight: self.half_open_in_flight,
        }
    }

    pub(crate) fn try_acquire(&mut self, config: &BreakerConfig) -> AdmitOutcome {
        match self.state {
            CircuitState::Closed => {
                self.emit_permitted(config);
                AdmitOutcome {
                    admitted: true,
                    half_open: false,
                }
            }
            CircuitState::Open => {
                let recovered = self
                    .last_failure_at
                    .map(|at| at.elapsed() >= config.recovery_time)
                    .unwrap_or(true);
                if recovered {
                    self.transition_to(CircuitState::HalfOpen, config);
                    self.half_open_in_flight = 1;
                    self.emit_permitted(config);
                    AdmitOutcome {
                        admitted: true,
                        half_open: true,
                    }
                } else {
                    self.emit_rejected(config);
                    AdmitOutcome {
                        admitted: false,
                        half_open: false,
                    }
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_in_flight < config.half_open_max_calls {
                    self.half_open_in_flight += 1;
                    self.emit_permitted(config);
                    AdmitOutcome {
                        admitted: true,
                        half_open: true,
                    }
                } else {
                    self.emit_rejected(config);
                    AdmitOutcome {
                        admitted: false,
                        half_open: false,
                    }
                }
            }
        }
    }

    pub(crate) fn record_success(&mut self, config: &BreakerConfig, half_open_probe: bool) {
        if half_open_probe {
            self.release_probe();
        }
        config.event_listeners.emit(&BreakerEvent::SuccessRecorded {
            source: config.name.clone(),
            timestamp: std::time::Instant::now(),
            state: self.state,
        });

        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Closed, config);
            }
            // A late success from a call admitted before the circuit
            // opened does not close it.
            CircuitState::Open => {}
        }
    }

    pub(crate) fn record_failure(&mut self, config: &BreakerConfig, half_open_probe: bool) {
        if half_open_probe {
            self.release_probe();
        }
        self.last_failure_at = Some(Instant::now());
        config.event_listeners.emit(&BreakerEvent::FailureRecorded {
            source: config.name.clone(),
            timestamp: std::time::Instant::now(),
            state: self.state,
        });

        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    self.transition_to(CircuitState::Open, config);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, config);
            }
            CircuitState::Open => {}
        }
    }

    /// Frees a half-open probe slot without resolving the state; used
    /// when a probe ends in an excluded error or is cancelled mid-flight.
    pub(crate) fn release_probe(&mut self) {
        self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
    }

    pub(crate) fn force_state(&mut self, state: CircuitState, config: &BreakerConfig) {
        if state == CircuitState::Open {
            self.last_failure_at = Some(Instant::now());
        }
        self.transition_to(state, config);
    }

    fn transition_to(&mut self, state: CircuitState, config: &BreakerConfig) {
        if self.state == state {
            return;
        }
        let from_state = self.state;

        config.event_listeners.emit(&BreakerEvent::StateTransition {
            source: config.name.clone(),
            timestamp: std::time::Instant::now(),
            from_state,
            to_state: state,
        });

        tracing::info!(
            breaker = %config.name,
            from = from_state.as_str(),
            to = state.as_str(),
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "sluice_breaker_transitions_total",
            "breaker" => config.name.clone(),
            "from" => from_state.as_str(),
            "to" => state.as_str()
        )
        .increment(1);

        self.state = state;
        self.consecutive_failures = 0;
        self.half_open_in_flight = 0;
    }

    fn emit_permitted(&self, config: &BreakerConfig) {
        config.event_listeners.emit(&BreakerEvent::CallPermitted {
            source: config.name.clone(),
            timestamp: std::time::Instant::now(),
            state: self.state,
        });

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "sluice_breaker_calls_total",
            "breaker" => config.name.clone(),
            "outcome" => "permitted"
        )
        .increment(1);
    }

    fn emit_rejected(&self, config: &BreakerConfig) {
        config.event_listeners.emit(&BreakerEvent::CallRejected {
            source: config.name.clone(),
            timestamp: std::time::Instant::now(),
        });

        tracing::debug!(breaker = %config.name, "call rejected, circuit open");

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "sluice_breaker_calls_total",
            "breaker" => config.name.clone(),
            "outcome" => "rejected"
        )
        .increment(1);
    }
}
