use crate::config::QueueConfig;
use crate::event::{Event, EventStatus};
use crate::queue::{BoundedQueue, QueueErrorHandler, QueueMetrics};
use futures::future::BoxFuture;
use sluice_core::{ApiError, ApiResult};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Admission step run in front of every event execution, e.g. a
/// rate-limiter token acquisition. An error fails the event without
/// invoking it.
pub type AdmissionFn<E> =
    Arc<dyn Fn(Arc<E>) -> BoxFuture<'static, ApiResult<()>> + Send + Sync>;

struct Registry<E> {
    events: HashMap<Uuid, Arc<E>>,
    pending: VecDeque<Uuid>,
}

struct ExecutorInner<E: Event> {
    queue: BoundedQueue<Arc<E>>,
    registry: Mutex<Registry<E>>,
    permits: Option<Arc<Semaphore>>,
    config: QueueConfig,
}

/// Runs [`Event`]s from an owned [`BoundedQueue`] on a worker pool.
///
/// Every appended event lives in an id-keyed map until it is popped, so
/// callers can observe terminal states after the fact; events hold no
/// pointer back to the executor. An optional concurrency limit caps how
/// many events run simultaneously, independent of the worker count.
pub struct Executor<E: Event> {
    inner: Arc<ExecutorInner<E>>,
}

impl<E: Event> Clone for Executor<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Event> std::fmt::Debug for Executor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock().unwrap();
        f.debug_struct("Executor")
            .field("name", &self.inner.config.name)
            .field("events", &registry.events.len())
            .field("pending", &registry.pending.len())
            .finish_non_exhaustive()
    }
}

impl<E: Event> Executor<E> {
    /// Creates an executor with its own queue from a validated config.
    pub fn new(config: QueueConfig) -> ApiResult<Self> {
        let queue = BoundedQueue::new(config.clone())?;
        let permits = config
            .concurrency_limit
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Ok(Self {
            inner: Arc::new(ExecutorInner {
                queue,
                registry: Mutex::new(Registry {
                    events: HashMap::new(),
                    pending: VecDeque::new(),
                }),
                permits,
                config,
            }),
        })
    }

    /// Registers an event in the map and marks it pending forward.
    pub fn append(&self, event: Arc<E>) {
        let mut registry = self.inner.registry.lock().unwrap();
        let id = event.id();
        registry.events.insert(id, event);
        registry.pending.push_back(id);
    }

    /// Drains pending events into the queue, in append order.
    ///
    /// An enqueue that times out fails the event with `Backpressure` and
    /// moves on; the terminal state is observable on the event. A stopped
    /// queue fails the event and propagates `InvalidState`.
    pub async fn forward(&self) -> ApiResult<()> {
        loop {
            let next = {
                let mut registry = self.inner.registry.lock().unwrap();
                let Some(id) = registry.pending.pop_front() else {
                    return Ok(());
                };
                registry.events.get(&id).cloned()
            };
            // Popped from the map between append and forward; skip.
            let Some(event) = next else { continue };

            match self.inner.queue.put(Arc::clone(&event)).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(
                        executor = %self.inner.config.name,
                        event = %event.id(),
                        "queue full, failing event with backpressure"
                    );
                    event.fail(ApiError::backpressure(
                        "enqueue timed out against a full queue",
                    ));
                }
                Err(err) => {
                    event.fail(err.clone());
                    return Err(err);
                }
            }
        }
    }

    /// Runs one event: waits for a concurrency permit when configured,
    /// then invokes it. Errors are captured on the event, never raised.
    pub async fn process_event(&self, event: Arc<E>) {
        let _permit = match &self.inner.permits {
            Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
            None => None,
        };
        tracing::debug!(
            executor = %self.inner.config.name,
            event = %event.id(),
            "processing event"
        );
        event.invoke().await;
    }

    /// Looks up a registered event by id.
    pub fn get(&self, id: Uuid) -> Option<Arc<E>> {
        self.inner.registry.lock().unwrap().events.get(&id).cloned()
    }

    /// Removes an event from the map (and from the pending set if it
    /// never got forwarded), returning it.
    pub fn pop(&self, id: Uuid) -> Option<Arc<E>> {
        let mut registry = self.inner.registry.lock().unwrap();
        registry.pending.retain(|pending| *pending != id);
        registry.events.remove(&id)
    }

    /// Whether nothing is pending, buffered, or in flight.
    pub fn is_all_processed(&self) -> bool {
        let pending_empty = self.inner.registry.lock().unwrap().pending.is_empty();
        pending_empty && self.inner.queue.is_drained()
    }

    /// Starts the queue and workers.
    pub fn start(&self) -> ApiResult<()> {
        self.start_with_admission(None)
    }

    /// Starts the queue and workers with an admission step run before
    /// each event executes.
    pub fn start_with_admission(&self, admission: Option<AdmissionFn<E>>) -> ApiResult<()> {
        self.inner.queue.start()?;

        let executor = self.clone();
        let handler = move |event: Arc<E>| -> BoxFuture<'static, ApiResult<()>> {
            let executor = executor.clone();
            let admission = admission.clone();
            Box::pin(async move {
                if let Some(gate) = admission {
                    if let Err(err) = gate(Arc::clone(&event)).await {
                        event.fail(err.clone());
                        return Err(err);
                    }
                }
                executor.process_event(Arc::clone(&event)).await;
                match event.status() {
                    EventStatus::Failed => Err(event
                        .error()
                        .unwrap_or_else(|| ApiError::server("event failed"))),
                    _ => Ok(()),
                }
            })
        };
        let on_error: QueueErrorHandler<Arc<E>> = Arc::new(|err, event| {
            tracing::debug!(event = %event.id(), error = %err, "event reached a failed state");
        });

        self.inner
            .queue
            .start_workers(self.inner.config.worker_count, handler, Some(on_error))
    }

    /// Waits until every forwarded event has been executed and
    /// acknowledged.
    pub async fn join(&self) -> ApiResult<()> {
        self.inner.queue.join().await
    }

    /// Stops the executor: forwards anything still pending, waits up to
    /// `timeout` for the queue to drain, cancels events that never
    /// reached a terminal state, and stops the queue.
    pub async fn stop(&self, timeout: Duration) -> ApiResult<()> {
        let forwarded = self.forward().await;
        if let Err(err) = &forwarded {
            tracing::warn!(
                executor = %self.inner.config.name,
                error = %err,
                "forward during stop failed"
            );
        }

        if tokio::time::timeout(timeout, self.inner.queue.join())
            .await
            .is_err()
        {
            tracing::warn!(
                executor = %self.inner.config.name,
                "timed out waiting for in-flight events to drain"
            );
        }

        self.inner
            .queue
            .stop(self.inner.config.stop_timeout)
            .await?;

        let unfinished: Vec<Arc<E>> = {
            let registry = self.inner.registry.lock().unwrap();
            registry
                .events
                .values()
                .filter(|event| !event.status().is_terminal())
                .cloned()
                .collect()
        };
        for event in unfinished {
            tracing::debug!(event = %event.id(), "cancelling unfinished event at teardown");
            event.cancel();
        }
        Ok(())
    }

    /// Runs `f` with the executor started, stopping it on every exit
    /// path.
    pub async fn scope<F, Fut, R>(&self, f: F) -> ApiResult<R>
    where
        F: FnOnce(Executor<E>) -> Fut,
        Fut: Future<Output = ApiResult<R>>,
    {
        self.start()?;
        let result = f(self.clone()).await;
        self.stop(self.inner.config.stop_timeout).await?;
        result
    }

    /// Snapshot of the underlying queue counters.
    pub fn metrics(&self) -> QueueMetrics {
        self.inner.queue.metrics()
    }

    /// The owned queue.
    pub fn queue(&self) -> &BoundedQueue<Arc<E>> {
        &self.inner.queue
    }

    pub(crate) fn config(&self) -> &QueueConfig {
        &self.inner.config
    }
}
