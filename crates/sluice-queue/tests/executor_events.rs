//! Executor behavior against an in-memory test event.

use async_trait::async_trait;
use sluice_core::{ApiError, ErrorKind};
use sluice_limiter::LimiterConfig;
use sluice_queue::{Event, EventStatus, Executor, QueueConfig, RateLimitedExecutor};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// A test event that records when it ran and can be told to fail or
/// stall.
struct TestEvent {
    id: Uuid,
    state: Mutex<EventStatus>,
    error: Mutex<Option<ApiError>>,
    outcome: Outcome,
    run_order: Option<(Arc<Mutex<Vec<u32>>>, u32)>,
    requires_tokens: bool,
    token_cost: u32,
}

enum Outcome {
    Succeed,
    Fail,
    Stall(Duration),
}

impl TestEvent {
    fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            state: Mutex::new(EventStatus::Pending),
            error: Mutex::new(None),
            outcome,
            run_order: None,
            requires_tokens: false,
            token_cost: 1,
        })
    }

    fn paid(order: Arc<Mutex<Vec<u32>>>, index: u32, cost: u32) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            state: Mutex::new(EventStatus::Pending),
            error: Mutex::new(None),
            outcome: Outcome::Succeed,
            run_order: Some((order, index)),
            requires_tokens: true,
            token_cost: cost,
        })
    }

    fn set_terminal(&self, status: EventStatus) {
        let mut state = self.state.lock().unwrap();
        if !state.is_terminal() {
            *state = status;
        }
    }
}

#[async_trait]
impl Event for TestEvent {
    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> EventStatus {
        *self.state.lock().unwrap()
    }

    async fn invoke(&self) {
        *self.state.lock().unwrap() = EventStatus::Running;
        if let Some((order, index)) = &self.run_order {
            order.lock().unwrap().push(*index);
        }
        match &self.outcome {
            Outcome::Succeed => self.set_terminal(EventStatus::Succeeded),
            Outcome::Fail => {
                *self.error.lock().unwrap() = Some(ApiError::server("instructed to fail"));
                self.set_terminal(EventStatus::Failed);
            }
            Outcome::Stall(pause) => {
                tokio::time::sleep(*pause).await;
                self.set_terminal(EventStatus::Succeeded);
            }
        }
    }

    fn error(&self) -> Option<ApiError> {
        self.error.lock().unwrap().clone()
    }

    fn fail(&self, error: ApiError) {
        *self.error.lock().unwrap() = Some(error);
        self.set_terminal(EventStatus::Failed);
    }

    fn cancel(&self) {
        self.set_terminal(EventStatus::Cancelled);
    }

    fn requires_tokens(&self) -> bool {
        self.requires_tokens
    }

    fn token_cost(&self) -> u32 {
        self.token_cost
    }
}

fn config(capacity: usize) -> QueueConfig {
    QueueConfig::builder()
        .capacity(capacity)
        .enqueue_timeout(Duration::from_millis(10))
        .worker_count(2)
        .name("executor-test")
        .build()
        .unwrap()
}

#[tokio::test]
async fn events_terminate_exactly_once_in_the_map() {
    let executor: Executor<TestEvent> = Executor::new(config(8)).unwrap();
    executor.start().unwrap();

    let ok = TestEvent::new(Outcome::Succeed);
    let bad = TestEvent::new(Outcome::Fail);
    executor.append(Arc::clone(&ok));
    executor.append(Arc::clone(&bad));
    executor.forward().await.unwrap();
    executor.join().await.unwrap();

    assert_eq!(ok.status(), EventStatus::Succeeded);
    assert_eq!(bad.status(), EventStatus::Failed);
    assert_eq!(bad.error().unwrap().kind, ErrorKind::Server);
    assert!(executor.is_all_processed());

    let metrics = executor.metrics();
    assert_eq!(metrics.enqueued, 2);
    assert_eq!(metrics.processed, 1);
    assert_eq!(metrics.errors, 1);

    // Terminal states stay observable until popped.
    assert_eq!(
        executor.get(ok.id()).unwrap().status(),
        EventStatus::Succeeded
    );
    assert!(executor.pop(ok.id()).is_some());
    assert!(executor.get(ok.id()).is_none());

    executor.stop(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn forward_fails_fast_on_backpressure() {
    // One slot, no workers pulling yet: the second event cannot fit.
    let executor: Executor<TestEvent> = Executor::new(
        QueueConfig::builder()
            .capacity(1)
            .enqueue_timeout(Duration::from_millis(10))
            .name("backpressure")
            .build()
            .unwrap(),
    )
    .unwrap();
    executor.queue().start().unwrap();

    let first = TestEvent::new(Outcome::Succeed);
    let second = TestEvent::new(Outcome::Succeed);
    executor.append(Arc::clone(&first));
    executor.append(Arc::clone(&second));
    executor.forward().await.unwrap();

    assert_eq!(first.status(), EventStatus::Pending);
    assert_eq!(second.status(), EventStatus::Failed);
    assert_eq!(second.error().unwrap().kind, ErrorKind::Backpressure);
    assert_eq!(executor.metrics().backpressure_events, 1);
}

#[tokio::test]
async fn scope_cancels_events_that_never_ran() {
    let executor: Executor<TestEvent> = Executor::new(
        QueueConfig::builder()
            .capacity(8)
            .stop_timeout(Duration::from_millis(100))
            .name("scoped")
            .build()
            .unwrap(),
    )
    .unwrap();
    let stalled = TestEvent::new(Outcome::Stall(Duration::from_secs(300)));
    let stalled_clone = Arc::clone(&stalled);

    let result = executor
        .scope(|executor| async move {
            executor.append(stalled_clone);
            executor.forward().await?;
            // Give a worker time to pick the event up, then leave the
            // scope while it is still running.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await;
    assert!(result.is_ok());

    // The stalled event was aborted mid-invoke and marked Cancelled.
    assert_eq!(stalled.status(), EventStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_serializes_execution() {
    let executor: Executor<TestEvent> = Executor::new(
        QueueConfig::builder()
            .capacity(8)
            .worker_count(4)
            .concurrency_limit(1)
            .name("serial")
            .build()
            .unwrap(),
    )
    .unwrap();
    executor.start().unwrap();

    let events: Vec<_> = (0..3)
        .map(|_| TestEvent::new(Outcome::Stall(Duration::from_millis(100))))
        .collect();
    for event in &events {
        executor.append(Arc::clone(event));
    }
    let started = Instant::now();
    executor.forward().await.unwrap();
    executor.join().await.unwrap();

    // Three 100ms events under a ceiling of one cannot overlap.
    assert!(started.elapsed() >= Duration::from_millis(300));
    for event in &events {
        assert_eq!(event.status(), EventStatus::Succeeded);
    }
    executor.stop(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn rate_limited_executor_paces_and_preserves_order() {
    let limiter = Arc::new(
        LimiterConfig::builder()
            .rate(2)
            .period(Duration::from_secs(1))
            .name("pacing")
            .build()
            .unwrap(),
    );
    let executor: RateLimitedExecutor<TestEvent> = RateLimitedExecutor::new(
        QueueConfig::builder()
            .capacity(8)
            .worker_count(1)
            .concurrency_limit(1)
            .name("paced")
            .build()
            .unwrap(),
        limiter,
    )
    .unwrap();
    executor.start().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let events: Vec<_> = (0..5)
        .map(|i| TestEvent::paid(Arc::clone(&order), i, 1))
        .collect();

    let started = Instant::now();
    for event in &events {
        executor.submit(Arc::clone(event)).await.unwrap();
    }
    executor.join().await.unwrap();

    // Five unit costs at 2 tokens/second.
    assert!(
        started.elapsed() >= Duration::from_secs(2),
        "elapsed {:?}",
        started.elapsed()
    );
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    for event in &events {
        assert_eq!(event.status(), EventStatus::Succeeded);
    }
    executor.stop(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn token_free_events_bypass_the_limiter() {
    // A bucket so slow that any token wait would dominate the test.
    let limiter = Arc::new(
        LimiterConfig::builder()
            .rate(1)
            .period(Duration::from_secs(3600))
            .name("glacial")
            .build()
            .unwrap(),
    );
    let executor: RateLimitedExecutor<TestEvent> =
        RateLimitedExecutor::new(config(4), limiter).unwrap();
    executor.start().unwrap();

    let free = TestEvent::new(Outcome::Succeed);
    executor.submit(Arc::clone(&free)).await.unwrap();
    executor.join().await.unwrap();
    assert_eq!(free.status(), EventStatus::Succeeded);

    executor.stop(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn keyed_executor_draws_from_per_endpoint_buckets() {
    let registry = Arc::new(
        sluice_limiter::EndpointLimiter::new(
            LimiterConfig::builder()
                .rate(100)
                .period(Duration::from_secs(1))
                .name("endpoints")
                .config(),
        )
        .unwrap(),
    );
    let executor: RateLimitedExecutor<TestEvent> = RateLimitedExecutor::keyed(
        config(4),
        Arc::clone(&registry),
        |_event: &TestEvent| "anthropic".to_string(),
    )
    .unwrap();
    executor.start().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let event = TestEvent::paid(Arc::clone(&order), 0, 1);
    executor.submit(Arc::clone(&event)).await.unwrap();
    executor.join().await.unwrap();

    assert_eq!(event.status(), EventStatus::Succeeded);
    // The shared registry lazily materialized the bucket for the key.
    assert_eq!(registry.len(), 1);

    executor.stop(Duration::from_millis(500)).await.unwrap();
}

#[tokio::test]
async fn submissions_count_against_queue_metrics() {
    let executor: Executor<TestEvent> = Executor::new(config(8)).unwrap();
    executor.start().unwrap();

    let total = 6u32;
    let counter = Arc::new(AtomicU32::new(0));
    for _ in 0..total {
        executor.append(TestEvent::new(Outcome::Succeed));
        counter.fetch_add(1, Ordering::SeqCst);
    }
    executor.forward().await.unwrap();
    executor.join().await.unwrap();

    let metrics = executor.metrics();
    assert_eq!(metrics.enqueued, u64::from(total));
    assert_eq!(metrics.processed + metrics.errors, u64::from(total));

    executor.stop(Duration::from_millis(500)).await.unwrap();
}
