use crate::config::QueueConfig;
use crate::event::Event;
use crate::executor::{AdmissionFn, Executor};
use crate::queue::QueueMetrics;
use futures::future::BoxFuture;
use sluice_core::ApiResult;
use sluice_limiter::{EndpointLimiter, TokenBucket};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How a [`RateLimitedExecutor`] resolves the bucket an event pays into.
enum LimiterHandle<E> {
    /// One bucket shared by every event.
    Shared(Arc<TokenBucket>),
    /// A per-endpoint registry plus a key derivation.
    Keyed {
        registry: Arc<EndpointLimiter>,
        key_fn: Arc<dyn Fn(&E) -> String + Send + Sync>,
    },
}

impl<E> Clone for LimiterHandle<E> {
    fn clone(&self) -> Self {
        match self {
            LimiterHandle::Shared(bucket) => LimiterHandle::Shared(Arc::clone(bucket)),
            LimiterHandle::Keyed { registry, key_fn } => LimiterHandle::Keyed {
                registry: Arc::clone(registry),
                key_fn: Arc::clone(key_fn),
            },
        }
    }
}

/// An [`Executor`] whose every execution pays rate-limiter tokens first.
///
/// Events whose [`requires_tokens`](Event::requires_tokens) is `false`
/// bypass the limiter; the cost of the rest is
/// [`token_cost`](Event::token_cost). The wait for tokens happens on the
/// worker, after dequeue, so the queue keeps absorbing submissions while
/// the limiter paces execution. Waits are interruptible: tokens are only
/// debited at the instant of a grant, so a teardown that aborts a waiting
/// worker consumes nothing.
pub struct RateLimitedExecutor<E: Event> {
    executor: Executor<E>,
    limiter: LimiterHandle<E>,
}

impl<E: Event> Clone for RateLimitedExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<E: Event> std::fmt::Debug for RateLimitedExecutor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedExecutor")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl<E: Event> RateLimitedExecutor<E> {
    /// Creates an executor where every event pays into one shared bucket.
    pub fn new(config: QueueConfig, limiter: Arc<TokenBucket>) -> ApiResult<Self> {
        Ok(Self {
            executor: Executor::new(config)?,
            limiter: LimiterHandle::Shared(limiter),
        })
    }

    /// Creates an executor that pays into a per-endpoint bucket, derived
    /// from each event by `key_fn`.
    pub fn keyed<F>(
        config: QueueConfig,
        registry: Arc<EndpointLimiter>,
        key_fn: F,
    ) -> ApiResult<Self>
    where
        F: Fn(&E) -> String + Send + Sync + 'static,
    {
        Ok(Self {
            executor: Executor::new(config)?,
            limiter: LimiterHandle::Keyed {
                registry,
                key_fn: Arc::new(key_fn),
            },
        })
    }

    /// Registers an event and forwards it into the queue.
    pub async fn submit(&self, event: Arc<E>) -> ApiResult<()> {
        self.executor.append(event);
        self.executor.forward().await
    }

    /// Starts the queue and workers with the token admission step.
    pub fn start(&self) -> ApiResult<()> {
        let limiter = self.limiter.clone();
        let admission: AdmissionFn<E> = Arc::new(move |event: Arc<E>| -> BoxFuture<'static, ApiResult<()>> {
            let limiter = limiter.clone();
            Box::pin(async move {
                if !event.requires_tokens() {
                    return Ok(());
                }
                let cost = event.token_cost();
                match &limiter {
                    LimiterHandle::Shared(bucket) => bucket.acquire(cost).await,
                    LimiterHandle::Keyed { registry, key_fn } => {
                        let bucket = registry.limiter_for(&key_fn(&event));
                        bucket.acquire(cost).await
                    }
                }
            })
        });
        self.executor.start_with_admission(Some(admission))
    }

    /// Stops the executor; see [`Executor::stop`].
    pub async fn stop(&self, timeout: Duration) -> ApiResult<()> {
        self.executor.stop(timeout).await
    }

    /// Runs `f` with the executor started, stopping it on every exit
    /// path.
    pub async fn scope<F, Fut, R>(&self, f: F) -> ApiResult<R>
    where
        F: FnOnce(RateLimitedExecutor<E>) -> Fut,
        Fut: Future<Output = ApiResult<R>>,
    {
        self.start()?;
        let result = f(self.clone()).await;
        self.executor
            .stop(self.executor.config().stop_timeout)
            .await?;
        result
    }

    /// Registers an event without forwarding it.
    pub fn append(&self, event: Arc<E>) {
        self.executor.append(event);
    }

    /// Drains pending events into the queue.
    pub async fn forward(&self) -> ApiResult<()> {
        self.executor.forward().await
    }

    /// Looks up a registered event by id.
    pub fn get(&self, id: Uuid) -> Option<Arc<E>> {
        self.executor.get(id)
    }

    /// Removes an event from the map, returning it.
    pub fn pop(&self, id: Uuid) -> Option<Arc<E>> {
        self.executor.pop(id)
    }

    /// Whether nothing is pending, buffered, or in flight.
    pub fn is_all_processed(&self) -> bool {
        self.executor.is_all_processed()
    }

    /// Waits until every forwarded event has been executed.
    pub async fn join(&self) -> ApiResult<()> {
        self.executor.join().await
    }

    /// Snapshot of the underlying queue counters.
    pub fn metrics(&self) -> QueueMetrics {
        self.executor.metrics()
    }

    /// The inner executor.
    pub fn executor(&self) -> &Executor<E> {
        &self.executor
    }
}
