use sluice_core::events::FlowEvent;
use std::time::Duration;
use std::time::Instant;

/// Events emitted by the rate limiter.
#[derive(Debug, Clone)]
pub enum LimiterEvent {
    /// A permit was granted and tokens were debited.
    PermitAcquired {
        source: String,
        timestamp: Instant,
        cost: u32,
    },
    /// The bucket could not cover the cost; the caller was told to wait.
    PermitDeferred {
        source: String,
        timestamp: Instant,
        cost: u32,
        wait: Duration,
    },
    /// The refill rate was changed, either manually or adaptively.
    RateUpdated {
        source: String,
        timestamp: Instant,
        old_rate: f64,
        new_rate: f64,
    },
}

impl FlowEvent for LimiterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LimiterEvent::PermitAcquired { .. } => "PermitAcquired",
            LimiterEvent::PermitDeferred { .. } => "PermitDeferred",
            LimiterEvent::RateUpdated { .. } => "RateUpdated",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            LimiterEvent::PermitAcquired { timestamp, .. }
            | LimiterEvent::PermitDeferred { timestamp, .. }
            | LimiterEvent::RateUpdated { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            LimiterEvent::PermitAcquired { source, .. }
            | LimiterEvent::PermitDeferred { source, .. }
            | LimiterEvent::RateUpdated { source, .. } => source,
        }
    }
}
