use sluice_core::events::FlowEvent;
use std::time::{Duration, Instant};

/// Events emitted by the retry policy.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A retry is about to sleep before the next attempt.
    Retry {
        source: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
    },
    /// The operation succeeded, on the first try or after retries.
    Success {
        source: String,
        timestamp: Instant,
        attempts: u32,
    },
    /// The operation failed after exhausting all retry attempts.
    Exhausted {
        source: String,
        timestamp: Instant,
        attempts: u32,
    },
    /// An error was re-raised without retrying (excluded or non-matching).
    IgnoredError { source: String, timestamp: Instant },
}

impl FlowEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Retry { .. } => "Retry",
            RetryEvent::Success { .. } => "Success",
            RetryEvent::Exhausted { .. } => "Exhausted",
            RetryEvent::IgnoredError { .. } => "IgnoredError",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            RetryEvent::Retry { source, .. }
            | RetryEvent::Success { source, .. }
            | RetryEvent::Exhausted { source, .. }
            | RetryEvent::IgnoredError { source, .. } => source,
        }
    }
}
