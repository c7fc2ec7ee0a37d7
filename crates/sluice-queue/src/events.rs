use crate::queue::QueueStatus;
use sluice_core::events::FlowEvent;
use std::time::Instant;

/// Events emitted by the bounded queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An enqueue timed out against a full buffer.
    Backpressure {
        source: String,
        timestamp: Instant,
        capacity: usize,
    },
    /// A worker's handler returned an error for an item.
    WorkerError { source: String, timestamp: Instant },
    /// The queue lifecycle state changed.
    StatusChanged {
        source: String,
        timestamp: Instant,
        status: QueueStatus,
    },
}

impl FlowEvent for QueueEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::Backpressure { .. } => "Backpressure",
            QueueEvent::WorkerError { .. } => "WorkerError",
            QueueEvent::StatusChanged { .. } => "StatusChanged",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            QueueEvent::Backpressure { timestamp, .. }
            | QueueEvent::WorkerError { timestamp, .. }
            | QueueEvent::StatusChanged { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            QueueEvent::Backpressure { source, .. }
            | QueueEvent::WorkerError { source, .. }
            | QueueEvent::StatusChanged { source, .. } => source,
        }
    }
}
