use crate::circuit::CircuitState;
use sluice_core::events::FlowEvent;
use std::time::Instant;

/// Events emitted by the circuit breaker.
#[derive(Debug, Clone)]
pub enum BreakerEvent {
    /// The circuit moved between states.
    StateTransition {
        source: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    /// A call was admitted.
    CallPermitted {
        source: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A call was rejected because the circuit is open.
    CallRejected { source: String, timestamp: Instant },
    /// A success was recorded against the circuit.
    SuccessRecorded {
        source: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A counted failure was recorded against the circuit.
    FailureRecorded {
        source: String,
        timestamp: Instant,
        state: CircuitState,
    },
}

impl FlowEvent for BreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BreakerEvent::StateTransition { .. } => "StateTransition",
            BreakerEvent::CallPermitted { .. } => "CallPermitted",
            BreakerEvent::CallRejected { .. } => "CallRejected",
            BreakerEvent::SuccessRecorded { .. } => "SuccessRecorded",
            BreakerEvent::FailureRecorded { .. } => "FailureRecorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BreakerEvent::StateTransition { timestamp, .. }
            | BreakerEvent::CallPermitted { timestamp, .. }
            | BreakerEvent::CallRejected { timestamp, .. }
            | BreakerEvent::SuccessRecorded { timestamp, .. }
            | BreakerEvent::FailureRecorded { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            BreakerEvent::StateTransition { source, .. }
            | BreakerEvent::CallPermitted { source, .. }
            | BreakerEvent::CallRejected { source, .. }
            | BreakerEvent::SuccessRecorded { source, .. }
            | BreakerEvent::FailureRecorded { source, .. } => source,
        }
    }
}
