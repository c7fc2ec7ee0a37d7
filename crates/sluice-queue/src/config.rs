use crate::events::QueueEvent;
use sluice_core::events::{EventListeners, FnListener};
use sluice_core::{ApiError, ApiResult};
use std::time::Duration;

/// Configuration shared by [`BoundedQueue`](crate::BoundedQueue) and the
/// executors built on top of it.
#[derive(Clone)]
pub struct QueueConfig {
    pub(crate) capacity: usize,
    pub(crate) enqueue_timeout: Duration,
    pub(crate) worker_count: usize,
    pub(crate) concurrency_limit: Option<usize>,
    pub(crate) stop_timeout: Duration,
    pub(crate) name: String,
    pub(crate) event_listeners: EventListeners<QueueEvent>,
}

impl QueueConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    pub(crate) fn validate(&self) -> ApiResult<()> {
        if self.capacity == 0 {
            return Err(ApiError::invalid_argument("queue capacity must be at least 1"));
        }
        if self.enqueue_timeout.is_zero() {
            return Err(ApiError::invalid_argument(
                "enqueue_timeout must be greater than zero",
            ));
        }
        if self.worker_count == 0 {
            return Err(ApiError::invalid_argument("worker_count must be at least 1"));
        }
        if self.concurrency_limit == Some(0) {
            return Err(ApiError::invalid_argument(
                "concurrency_limit must be at least 1 when set",
            ));
        }
        Ok(())
    }
}

/// Builder for [`QueueConfig`].
pub struct QueueConfigBuilder {
    capacity: usize,
    enqueue_timeout: Duration,
    worker_count: usize,
    concurrency_limit: Option<usize>,
    stop_timeout: Duration,
    name: String,
    event_listeners: EventListeners<QueueEvent>,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - capacity: 100
    /// - enqueue_timeout: 100 ms
    /// - worker_count: 4
    /// - concurrency_limit: none
    /// - stop_timeout: 5 seconds
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            capacity: 100,
            enqueue_timeout: Duration::from_millis(100),
            worker_count: 4,
            concurrency_limit: None,
            stop_timeout: Duration::from_secs(5),
            name: "<unnamed>".to_string(),
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the hard capacity of the buffer.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets how long `put` waits for space before reporting backpressure.
    pub fn enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Sets how many worker tasks `start_workers` spawns by default.
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Caps how many events run simultaneously, independent of the
    /// worker count.
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// Sets how long scoped teardown waits for workers before aborting
    /// them.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the name for this queue instance (used in events and logs).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback for backpressure events.
    pub fn on_backpressure<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &QueueEvent| {
                if matches!(event, QueueEvent::Backpressure { .. }) {
                    f();
                }
            }));
        self
    }

    /// Finishes the builder as a validated config.
    pub fn build(self) -> ApiResult<QueueConfig> {
        let config = QueueConfig {
            capacity: self.capacity,
            enqueue_timeout: self.enqueue_timeout,
            worker_count: self.worker_count,
            concurrency_limit: self.concurrency_limit,
            stop_timeout: self.stop_timeout,
            name: self.name,
            event_listeners: self.event_listeners,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        assert!(QueueConfig::builder().build().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(QueueConfig::builder().capacity(0).build().is_err());
        assert!(QueueConfig::builder()
            .enqueue_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(QueueConfig::builder().worker_count(0).build().is_err());
        assert!(QueueConfig::builder().concurrency_limit(0).build().is_err());
    }
}
