//! Bounded work queue and event executors.
//!
//! This crate is the scheduling heart of sluice:
//!
//! - [`BoundedQueue`]: a FIFO channel with a hard capacity, bounded-wait
//!   enqueue (backpressure), a cooperative worker pool, and an
//!   Idle/Processing/Stopped lifecycle.
//! - [`Event`]: the unit-of-work seam. Anything with an id, a status, and
//!   an `invoke` that captures its own outcome can be executed.
//! - [`Executor`]: owns a queue and an id-keyed event map; forwards
//!   appended events into the queue and runs them on workers, optionally
//!   under a concurrency ceiling.
//! - [`RateLimitedExecutor`]: the same, with a token-bucket admission
//!   step in front of every execution.
//!
//! # Backpressure
//!
//! `put` tries to enqueue within a short timeout and returns `false`
//! instead of erroring when the queue stays full, counting a
//! backpressure event. Callers choose to retry, shed, or fail the work;
//! [`Executor::forward`] fails the event with a `Backpressure` error.
//!
//! # Ordering
//!
//! Within one queue, enqueue and dequeue are FIFO. Across the limiter,
//! queue, and breaker there is no global ordering: a submission delayed
//! by token acquisition can be overtaken by a later one that needs no
//! tokens. Callers that require strict ordering serialize at submission
//! (one worker, concurrency limit 1).
//!
//! # Teardown
//!
//! `stop` is idempotent: it flips the queue to Stopped, wakes every
//! blocked waiter, and awaits workers up to a timeout before aborting
//! them. [`BoundedQueue::scope`] and [`Executor::scope`] run start on
//! entry and stop on every exit path.

mod config;
mod event;
mod events;
mod executor;
mod queue;
mod rate_limited;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use event::{Event, EventStatus};
pub use events::QueueEvent;
pub use executor::{AdmissionFn, Executor};
pub use queue::{BoundedQueue, QueueErrorHandler, QueueMetrics, QueueStatus};
pub use rate_limited::RateLimitedExecutor;
