use crate::config::QueueConfig;
use crate::events::QueueEvent;
use futures::future::BoxFuture;
use sluice_core::{ApiError, ApiResult};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Lifecycle state of a [`BoundedQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Constructed but not started; all item operations are rejected.
    Idle,
    /// Accepting and delivering items.
    Processing,
    /// Stopped; item operations fail with `InvalidState`. Terminal.
    Stopped,
}

/// Snapshot of the queue's counters.
///
/// At any observation point,
/// `enqueued == processed + errors + in_flight + buffered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueMetrics {
    /// Items accepted by `put`.
    pub enqueued: u64,
    /// Items acknowledged successfully.
    pub processed: u64,
    /// Items acknowledged as failed.
    pub errors: u64,
    /// Enqueue attempts that timed out against a full buffer.
    pub backpressure_events: u64,
    /// Items currently sitting in the buffer.
    pub buffered: u64,
    /// Items dequeued but not yet acknowledged.
    pub in_flight: u64,
}

/// Handler invoked with the error and the item when a worker's task
/// fails.
pub type QueueErrorHandler<T> = Arc<dyn Fn(&ApiError, &T) + Send + Sync>;

struct QueueState<T> {
    buf: VecDeque<T>,
    status: QueueStatus,
    in_flight: u64,
    enqueued: u64,
    processed: u64,
    errors: u64,
    backpressure_events: u64,
}

impl<T> QueueState<T> {
    fn drained(&self) -> bool {
        self.buf.is_empty() && self.in_flight == 0
    }
}

struct QueueInner<T> {
    config: QueueConfig,
    state: Mutex<QueueState<T>>,
    not_empty: Notify,
    not_full: Notify,
    drained: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> Drop for QueueInner<T> {
    fn drop(&mut self) {
        // Backstop for scopes cancelled mid-flight: workers must not
        // outlive the queue they poll.
        for handle in self.workers.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

/// A FIFO work queue with a hard capacity and bounded-wait enqueue.
///
/// Clones share the same queue. Items are delivered in FIFO order; each
/// dequeued item must be acknowledged exactly once with
/// [`task_done`](BoundedQueue::task_done) or
/// [`task_failed`](BoundedQueue::task_failed), or
/// [`join`](BoundedQueue::join) never completes.
pub struct BoundedQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("BoundedQueue")
            .field("name", &self.inner.config.name)
            .field("status", &state.status)
            .field("buffered", &state.buf.len())
            .field("capacity", &self.inner.config.capacity)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> BoundedQueue<T> {
    /// Creates a queue from a validated config.
    pub fn new(config: QueueConfig) -> ApiResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState {
                    buf: VecDeque::new(),
                    status: QueueStatus::Idle,
                    in_flight: 0,
                    enqueued: 0,
                    processed: 0,
                    errors: 0,
                    backpressure_events: 0,
                }),
                not_empty: Notify::new(),
                not_full: Notify::new(),
                drained: Notify::new(),
                workers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Moves the queue from Idle to Processing. Idempotent while
    /// Processing; a stopped queue cannot be restarted.
    pub fn start(&self) -> ApiResult<()> {
        let mut state = self.inner.state.lock().unwrap();
        match state.status {
            QueueStatus::Idle => {
                state.status = QueueStatus::Processing;
                drop(state);
                tracing::info!(queue = %self.inner.config.name, "queue started");
                self.emit_status(QueueStatus::Processing);
                Ok(())
            }
            QueueStatus::Processing => Ok(()),
            QueueStatus::Stopped => Err(ApiError::invalid_state(
                "a stopped queue cannot be restarted",
            )),
        }
    }

    /// Attempts to enqueue an item, waiting at most the configured
    /// enqueue timeout for space.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when the buffer
    /// stayed full for the whole timeout; the latter counts a
    /// backpressure event but is not an error. Fails with `InvalidState`
    /// outside Processing.
    pub async fn put(&self, item: T) -> ApiResult<bool> {
        let deadline = tokio::time::Instant::now() + self.inner.config.enqueue_timeout;

        loop {
            // Register interest before checking state so a notify between
            // the check and the await is not lost.
            let space = self.inner.not_full.notified();
            {
                let mut state = self.inner.state.lock().unwrap();
                match state.status {
                    QueueStatus::Processing => {}
                    QueueStatus::Idle => {
                        return Err(ApiError::invalid_state("queue has not been started"))
                    }
                    QueueStatus::Stopped => {
                        return Err(ApiError::invalid_state("queue is stopped"))
                    }
                }
                if state.buf.len() < self.inner.config.capacity {
                    state.buf.push_back(item);
                    state.enqueued += 1;
                    drop(state);
                    self.inner.not_empty.notify_one();

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "sluice_queue_enqueued_total",
                        "queue" => self.inner.config.name.clone()
                    )
                    .increment(1);

                    return Ok(true);
                }
            }

            match tokio::time::timeout_at(deadline, space).await {
                Ok(()) => continue,
                Err(_) => {
                    self.inner.state.lock().unwrap().backpressure_events += 1;
                    tracing::debug!(
                        queue = %self.inner.config.name,
                        capacity = self.inner.config.capacity,
                        "enqueue timed out, backpressure"
                    );
                    self.inner.config.event_listeners.emit(&QueueEvent::Backpressure {
                        source: self.inner.config.name.clone(),
                        timestamp: std::time::Instant::now(),
                        capacity: self.inner.config.capacity,
                    });

                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "sluice_queue_backpressure_total",
                        "queue" => self.inner.config.name.clone()
                    )
                    .increment(1);

                    return Ok(false);
                }
            }
        }
    }

    /// Dequeues the oldest item, waiting until one is available.
    ///
    /// Fails with `InvalidState` once the queue is stopped, which is how
    /// blocked workers learn to exit.
    pub async fn get(&self) -> ApiResult<T> {
        loop {
            let available = self.inner.not_empty.notified();
            {
                let mut state = self.inner.state.lock().unwrap();
                match state.status {
                    QueueStatus::Processing => {}
                    QueueStatus::Idle => {
                        return Err(ApiError::invalid_state("queue has not been started"))
                    }
                    QueueStatus::Stopped => {
                        return Err(ApiError::invalid_state("queue is stopped"))
                    }
                }
                if let Some(item) = state.buf.pop_front() {
                    state.in_flight += 1;
                    drop(state);
                    self.inner.not_full.notify_one();
                    return Ok(item);
                }
            }
            available.await;
        }
    }

    /// Acknowledges a dequeued item as processed successfully.
    pub fn task_done(&self) -> ApiResult<()> {
        self.acknowledge(false)
    }

    /// Acknowledges a dequeued item as failed.
    pub fn task_failed(&self) -> ApiResult<()> {
        self.acknowledge(true)
    }

    fn acknowledge(&self, failed: bool) -> ApiResult<()> {
        let mut state = self.inner.state.lock().unwrap();
        if state.in_flight == 0 {
            return Err(ApiError::invalid_state(
                "acknowledge called with no item in flight",
            ));
        }
        state.in_flight -= 1;
        if failed {
            state.errors += 1;
        } else {
            state.processed += 1;
        }
        let drained = state.drained();
        drop(state);
        if drained {
            self.inner.drained.notify_waiters();
        }
        Ok(())
    }

    /// Waits until every enqueued item has been dequeued and
    /// acknowledged.
    pub async fn join(&self) -> ApiResult<()> {
        loop {
            let drained = self.inner.drained.notified();
            {
                let state = self.inner.state.lock().unwrap();
                if state.drained() {
                    return Ok(());
                }
                if state.status == QueueStatus::Stopped {
                    return Err(ApiError::invalid_state("queue stopped before draining"));
                }
            }
            drained.await;
        }
    }

    /// Spawns `count` cooperative workers that pull items, run `handler`,
    /// and acknowledge.
    ///
    /// A handler error is passed to `on_error` (when provided) and
    /// acknowledged as failed; it never tears the worker down. Workers
    /// exit when the queue stops.
    pub fn start_workers<F>(
        &self,
        count: usize,
        handler: F,
        on_error: Option<QueueErrorHandler<T>>,
    ) -> ApiResult<()>
    where
        T: Clone,
        F: Fn(T) -> BoxFuture<'static, ApiResult<()>> + Send + Sync + 'static,
    {
        if count == 0 {
            return Err(ApiError::invalid_argument("worker count must be at least 1"));
        }
        {
            let state = self.inner.state.lock().unwrap();
            if state.status != QueueStatus::Processing {
                return Err(ApiError::invalid_state(
                    "workers can only be started while the queue is processing",
                ));
            }
        }

        let handler = Arc::new(handler);
        let mut workers = self.inner.workers.lock().unwrap();
        for index in 0..count {
            let queue = self.clone();
            let handler = Arc::clone(&handler);
            let on_error = on_error.clone();
            workers.push(tokio::spawn(async move {
                queue.worker_loop(index, handler, on_error).await;
            }));
        }
        tracing::debug!(queue = %self.inner.config.name, count, "workers started");
        Ok(())
    }

    async fn worker_loop<F>(
        &self,
        index: usize,
        handler: Arc<F>,
        on_error: Option<QueueErrorHandler<T>>,
    ) where
        T: Clone,
        F: Fn(T) -> BoxFuture<'static, ApiResult<()>> + Send + Sync + 'static,
    {
        loop {
            let item = match self.get().await {
                Ok(item) => item,
                Err(_) => break,
            };
            match handler(item.clone()).await {
                Ok(()) => {
                    let _ = self.task_done();
                }
                Err(err) => {
                    if let Some(hook) = &on_error {
                        hook(&err, &item);
                    }
                    tracing::warn!(
                        queue = %self.inner.config.name,
                        worker = index,
                        error = %err,
                        "worker task failed"
                    );
                    self.inner.config.event_listeners.emit(&QueueEvent::WorkerError {
                        source: self.inner.config.name.clone(),
                        timestamp: std::time::Instant::now(),
                    });
                    let _ = self.task_failed();
                }
            }
        }
        tracing::debug!(queue = %self.inner.config.name, worker = index, "worker exited");
    }

    /// Stops the queue: wakes all blocked waiters, awaits workers up to
    /// `timeout`, and aborts any that remain. Idempotent.
    pub async fn stop(&self, timeout: Duration) -> ApiResult<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.status == QueueStatus::Stopped {
                return Ok(());
            }
            state.status = QueueStatus::Stopped;
        }
        tracing::info!(queue = %self.inner.config.name, "queue stopping");
        self.emit_status(QueueStatus::Stopped);

        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
        self.inner.drained.notify_waiters();

        let handles: Vec<JoinHandle<()>> =
            self.inner.workers.lock().unwrap().drain(..).collect();
        let deadline = tokio::time::Instant::now() + timeout;
        for mut handle in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => {}
                Err(_) => {
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
        Ok(())
    }

    /// Runs `f` with the queue started, stopping it on every exit path.
    pub async fn scope<F, Fut, R>(&self, f: F) -> ApiResult<R>
    where
        F: FnOnce(BoundedQueue<T>) -> Fut,
        Fut: Future<Output = ApiResult<R>>,
    {
        self.start()?;
        let result = f(self.clone()).await;
        self.stop(self.inner.config.stop_timeout).await?;
        result
    }

    /// Current lifecycle status.
    pub fn status(&self) -> QueueStatus {
        self.inner.state.lock().unwrap().status
    }

    /// Number of buffered items.
    pub fn size(&self) -> usize {
        self.inner.state.lock().unwrap().buf.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the buffer is at capacity.
    pub fn is_full(&self) -> bool {
        self.size() >= self.inner.config.capacity
    }

    /// Whether nothing is buffered or in flight.
    pub fn is_drained(&self) -> bool {
        self.inner.state.lock().unwrap().drained()
    }

    /// Number of live worker tasks.
    pub fn worker_count(&self) -> usize {
        self.inner
            .workers
            .lock()
            .unwrap()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Snapshot of the queue counters.
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.inner.state.lock().unwrap();
        QueueMetrics {
            enqueued: state.enqueued,
            processed: state.processed,
            errors: state.errors,
            backpressure_events: state.backpressure_events,
            buffered: state.buf.len() as u64,
            in_flight: state.in_flight,
        }
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn emit_status(&self, status: QueueStatus) {
        self.inner.config.event_listeners.emit(&QueueEvent::StatusChanged {
            source: self.inner.config.name.clone(),
            timestamp: std::time::Instant::now(),
            status,
        });
    }
}
