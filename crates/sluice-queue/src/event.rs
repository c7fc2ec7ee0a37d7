use async_trait::async_trait;
use sluice_core::ApiError;
use uuid::Uuid;

/// Execution state of a unit of work.
///
/// The three terminal states are write-once: an event that reached one
/// never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Created, not yet picked up by a worker.
    Pending,
    /// A worker is invoking it.
    Running,
    /// Finished with a result.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Abandoned before a result was produced.
    Cancelled,
}

impl EventStatus {
    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventStatus::Succeeded | EventStatus::Failed | EventStatus::Cancelled
        )
    }

    /// Stable lowercase label, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Running => "running",
            EventStatus::Succeeded => "succeeded",
            EventStatus::Failed => "failed",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

/// A unit of work an [`Executor`](crate::Executor) can run.
///
/// Implementations own their execution record: `invoke` must capture its
/// outcome (result or classified error) on the event itself and never
/// panic or return an error to the worker. The executor only observes
/// [`status`](Event::status) afterwards.
#[async_trait]
pub trait Event: Send + Sync + 'static {
    /// Unique id, assigned at creation.
    fn id(&self) -> Uuid;

    /// Current execution status.
    fn status(&self) -> EventStatus;

    /// Runs the work, recording the outcome on the event.
    async fn invoke(&self);

    /// The error recorded by a failed invocation, if any.
    fn error(&self) -> Option<ApiError>;

    /// Forces the event into the Failed state without running it, e.g.
    /// when the queue refuses it under backpressure. No-op once terminal.
    fn fail(&self, error: ApiError);

    /// Marks the event Cancelled. No-op once terminal.
    fn cancel(&self);

    /// Whether executions of this event must pay rate-limiter tokens.
    fn requires_tokens(&self) -> bool {
        false
    }

    /// The token cost of one execution.
    fn token_cost(&self) -> u32 {
        1
    }
}
