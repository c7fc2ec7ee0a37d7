use crate::endpoint::Endpoint;
use crate::Payload;
use async_trait::async_trait;
use serde_json::Value;
use sluice_breaker::CircuitBreaker;
use sluice_core::{ApiError, ApiResult};
use sluice_queue::{Event, EventStatus};
use sluice_retry::RetryPolicy;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::SystemTime;
use tokio::sync::watch;
use uuid::Uuid;

/// Callback fired exactly once when a call reaches a terminal state.
pub type TerminalHook = Arc<dyn Fn(&ApiCall) + Send + Sync>;

/// Mutable execution record, guarded by one mutex; terminal transitions
/// are write-once.
struct Execution {
    status: EventStatus,
    started_at: Option<SystemTime>,
    ended_at: Option<SystemTime>,
    attempts: u32,
    result: Option<Value>,
    error: Option<ApiError>,
}

/// One outbound request bound to its endpoint and execution state.
///
/// An `ApiCall` is created Pending, mutated only by the worker that
/// invokes it, and ends in exactly one of Succeeded, Failed, or
/// Cancelled. Callers observe the outcome on the call itself — errors
/// never escape the worker — either by polling [`status`](ApiCall::status)
/// or by awaiting [`outcome`](ApiCall::outcome).
pub struct ApiCall {
    id: Uuid,
    created_at: SystemTime,
    endpoint: Arc<Endpoint>,
    request: Payload,
    cache_control: Option<String>,
    requires_tokens: bool,
    token_cost: OnceLock<u32>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
    on_terminal: Option<TerminalHook>,
    execution: Mutex<Execution>,
    status_tx: watch::Sender<EventStatus>,
}

impl std::fmt::Debug for ApiCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCall")
            .field("id", &self.id)
            .field("provider", &self.endpoint.config().provider())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ApiCall {
    /// Creates a builder for a call against `endpoint`.
    pub fn builder(endpoint: Arc<Endpoint>) -> ApiCallBuilder {
        ApiCallBuilder {
            endpoint,
            request: Payload::new(),
            cache_control: None,
            requires_tokens: true,
            token_cost: None,
            breaker: None,
            retry: None,
            on_terminal: None,
        }
    }

    /// Unique id assigned at creation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the call was created.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// The request payload.
    pub fn request(&self) -> &Payload {
        &self.request
    }

    /// Current execution status.
    pub fn status(&self) -> EventStatus {
        self.execution.lock().unwrap().status
    }

    /// The successful result, once Succeeded.
    pub fn result(&self) -> Option<Value> {
        self.execution.lock().unwrap().result.clone()
    }

    /// The recorded error, once Failed or Cancelled.
    pub fn error(&self) -> Option<ApiError> {
        self.execution.lock().unwrap().error.clone()
    }

    /// How many endpoint attempts ran (retries included).
    pub fn attempts(&self) -> u32 {
        self.execution.lock().unwrap().attempts
    }

    /// When the worker started the call.
    pub fn started_at(&self) -> Option<SystemTime> {
        self.execution.lock().unwrap().started_at
    }

    /// When the call reached its terminal state.
    pub fn ended_at(&self) -> Option<SystemTime> {
        self.execution.lock().unwrap().ended_at
    }

    /// Sets the token cost. Write-once, and only before the call runs.
    pub fn set_token_cost(&self, cost: u32) -> ApiResult<()> {
        if cost == 0 {
            return Err(ApiError::invalid_argument("token cost must be at least 1"));
        }
        if self.status() != EventStatus::Pending {
            return Err(ApiError::invalid_state(
                "token cost can only be set before the call runs",
            ));
        }
        self.token_cost
            .set(cost)
            .map_err(|_| ApiError::invalid_state("token cost already set"))
    }

    /// Waits until the call reaches a terminal state and returns it.
    pub async fn completed(&self) -> EventStatus {
        let mut status_rx = self.status_tx.subscribe();
        loop {
            let current = *status_rx.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if status_rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Waits for the terminal state and re-raises the classified error
    /// for failed and cancelled calls.
    pub async fn outcome(&self) -> ApiResult<Value> {
        match self.completed().await {
            EventStatus::Succeeded => Ok(self.result().unwrap_or(Value::Null)),
            EventStatus::Cancelled => Err(self
                .error()
                .unwrap_or_else(|| ApiError::cancelled("call was cancelled"))),
            _ => Err(self
                .error()
                .unwrap_or_else(|| ApiError::server("call failed without a recorded error"))),
        }
    }

    /// Runs the call: Pending → Running, endpoint execution under the
    /// configured resilience wrappers, then a write-once terminal state.
    ///
    /// Nothing is raised out of this method; failures are recorded on
    /// the call.
    pub async fn invoke(&self) {
        {
            let mut execution = self.execution.lock().unwrap();
            match execution.status {
                EventStatus::Pending => {
                    execution.status = EventStatus::Running;
                    execution.started_at = Some(SystemTime::now());
                }
                status if status.is_terminal() => {
                    tracing::debug!(call = %self.id, status = status.as_str(), "invoke on terminal call ignored");
                    return;
                }
                _ => {
                    tracing::warn!(call = %self.id, "invoke on a call that is already running");
                    return;
                }
            }
        }
        self.status_tx.send_replace(EventStatus::Running);

        let result = self.perform().await;
        self.finish(result);
    }

    /// The endpoint execution with retry inside and breaker outside, so
    /// the breaker counts a retried-then-exhausted sequence as one
    /// failure.
    async fn perform(&self) -> ApiResult<Value> {
        let call = || self.endpoint.call(&self.request, self.cache_control.as_deref());
        match (&self.breaker, &self.retry) {
            (Some(breaker), Some(retry)) => {
                breaker
                    .execute(|| {
                        retry.run_with(|attempt| {
                            self.note_attempt(attempt + 1);
                            call()
                        })
                    })
                    .await
            }
            (None, Some(retry)) => {
                retry
                    .run_with(|attempt| {
                        self.note_attempt(attempt + 1);
                        call()
                    })
                    .await
            }
            (Some(breaker), None) => {
                self.note_attempt(1);
                breaker.execute(call).await
            }
            (None, None) => {
                self.note_attempt(1);
                call().await
            }
        }
    }

    fn note_attempt(&self, attempt: u32) {
        self.execution.lock().unwrap().attempts = attempt;
    }

    fn finish(&self, result: ApiResult<Value>) {
        let status = {
            let mut execution = self.execution.lock().unwrap();
            if execution.status.is_terminal() {
                return;
            }
            execution.ended_at = Some(SystemTime::now());
            match result {
                Ok(value) => {
                    execution.result = Some(value);
                    execution.status = EventStatus::Succeeded;
                }
                Err(err) => {
                    tracing::debug!(call = %self.id, kind = err.kind.as_str(), "call failed");
                    execution.error = Some(err);
                    execution.status = EventStatus::Failed;
                }
            }
            execution.status
        };
        self.status_tx.send_replace(status);
        if let Some(hook) = &self.on_terminal {
            hook(self);
        }
    }

    fn force_terminal(&self, status: EventStatus, error: Option<ApiError>) {
        {
            let mut execution = self.execution.lock().unwrap();
            if execution.status.is_terminal() {
                return;
            }
            execution.ended_at = Some(SystemTime::now());
            execution.error = error;
            execution.status = status;
        }
        self.status_tx.send_replace(status);
        if let Some(hook) = &self.on_terminal {
            hook(self);
        }
    }
}

#[async_trait]
impl Event for ApiCall {
    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> EventStatus {
        ApiCall::status(self)
    }

    async fn invoke(&self) {
        ApiCall::invoke(self).await;
    }

    fn error(&self) -> Option<ApiError> {
        ApiCall::error(self)
    }

    fn fail(&self, error: ApiError) {
        self.force_terminal(EventStatus::Failed, Some(error));
    }

    fn cancel(&self) {
        self.force_terminal(
            EventStatus::Cancelled,
            Some(ApiError::cancelled("call cancelled before completion")),
        );
    }

    fn requires_tokens(&self) -> bool {
        self.requires_tokens
    }

    fn token_cost(&self) -> u32 {
        self.token_cost.get().copied().unwrap_or(1)
    }
}

/// Builder for [`ApiCall`].
pub struct ApiCallBuilder {
    endpoint: Arc<Endpoint>,
    request: Payload,
    cache_control: Option<String>,
    requires_tokens: bool,
    token_cost: Option<u32>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
    on_terminal: Option<TerminalHook>,
}

impl ApiCallBuilder {
    /// Sets the request payload.
    pub fn request(mut self, request: Payload) -> Self {
        self.request = request;
        self
    }

    /// Sets the cache-control directive hint passed to the endpoint.
    pub fn cache_control<S: Into<String>>(mut self, directive: S) -> Self {
        self.cache_control = Some(directive.into());
        self
    }

    /// Sets whether the call pays rate-limiter tokens (default: true).
    pub fn requires_tokens(mut self, requires: bool) -> Self {
        self.requires_tokens = requires;
        self
    }

    /// Sets the explicit token cost (default: 1).
    pub fn token_cost(mut self, cost: u32) -> Self {
        self.token_cost = Some(cost);
        self
    }

    /// Wraps the endpoint execution in a circuit breaker.
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Wraps the endpoint execution in a retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Registers a callback fired once at the terminal state.
    pub fn on_terminal<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ApiCall) + Send + Sync + 'static,
    {
        self.on_terminal = Some(Arc::new(hook));
        self
    }

    /// Registers an already-shared terminal callback.
    pub fn on_terminal_hook(mut self, hook: TerminalHook) -> Self {
        self.on_terminal = Some(hook);
        self
    }

    /// Validates and builds the call.
    pub fn build(self) -> ApiResult<ApiCall> {
        if self.token_cost == Some(0) {
            return Err(ApiError::invalid_argument("token cost must be at least 1"));
        }
        let (status_tx, _status_rx) = watch::channel(EventStatus::Pending);
        let token_cost = OnceLock::new();
        if let Some(cost) = self.token_cost {
            let _ = token_cost.set(cost);
        }
        Ok(ApiCall {
            id: Uuid::new_v4(),
            created_at: SystemTime::now(),
            endpoint: self.endpoint,
            request: self.request,
            cache_control: self.cache_control,
            requires_tokens: self.requires_tokens,
            token_cost,
            breaker: self.breaker,
            retry: self.retry,
            on_terminal: self.on_terminal,
            execution: Mutex::new(Execution {
                status: EventStatus::Pending,
                started_at: None,
                ended_at: None,
                attempts: 0,
                result: None,
                error: None,
            }),
            status_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, TransportKind};
    use futures::future::BoxFuture;

    fn sdk_endpoint<F>(handler: F) -> Arc<Endpoint>
    where
        F: Fn(Value) -> BoxFuture<'static, ApiResult<Value>> + Send + Sync + 'static,
    {
        let config = EndpointConfig::builder()
            .provider("fake")
            .transport(TransportKind::Sdk)
            .build()
            .unwrap();
        Arc::new(Endpoint::new(config).with_sdk_handler(handler))
    }

    fn ok_endpoint() -> Arc<Endpoint> {
        sdk_endpoint(|request| -> BoxFuture<'static, ApiResult<Value>> {
            Box::pin(async move { Ok(request) })
        })
    }

    #[tokio::test]
    async fn invoke_records_result_and_timestamps() {
        let mut request = Payload::new();
        request.insert("prompt".into(), Value::String("hi".into()));
        let call = ApiCall::builder(ok_endpoint())
            .request(request)
            .build()
            .unwrap();

        assert_eq!(call.status(), EventStatus::Pending);
        call.invoke().await;

        assert_eq!(call.status(), EventStatus::Succeeded);
        assert_eq!(call.result().unwrap()["prompt"], "hi");
        assert_eq!(call.attempts(), 1);
        assert!(call.started_at().is_some());
        assert!(call.ended_at().is_some());
        assert!(call.error().is_none());
    }

    #[tokio::test]
    async fn failure_is_captured_not_raised() {
        let endpoint = sdk_endpoint(|_| -> BoxFuture<'static, ApiResult<Value>> {
            Box::pin(async { Err(ApiError::server("sdk exploded")) })
        });
        let call = ApiCall::builder(endpoint).build().unwrap();
        call.invoke().await;

        assert_eq!(call.status(), EventStatus::Failed);
        assert_eq!(call.error().unwrap().kind, sluice_core::ErrorKind::Server);
    }

    #[tokio::test]
    async fn invoke_on_terminal_call_is_ignored() {
        let call = ApiCall::builder(ok_endpoint()).build().unwrap();
        call.invoke().await;
        let first_end = call.ended_at();
        call.invoke().await;
        assert_eq!(call.ended_at(), first_end);
        assert_eq!(call.status(), EventStatus::Succeeded);
    }

    #[tokio::test]
    async fn cancel_does_not_override_success() {
        let call = ApiCall::builder(ok_endpoint()).build().unwrap();
        call.invoke().await;
        Event::cancel(&call);
        assert_eq!(call.status(), EventStatus::Succeeded);
    }

    #[tokio::test]
    async fn token_cost_is_write_once_before_run() {
        let call = ApiCall::builder(ok_endpoint()).build().unwrap();
        assert_eq!(Event::token_cost(&call), 1);
        call.set_token_cost(7).unwrap();
        assert_eq!(Event::token_cost(&call), 7);
        assert!(call.set_token_cost(9).is_err());

        call.invoke().await;
        let late = ApiCall::builder(ok_endpoint()).build().unwrap();
        late.invoke().await;
        assert!(late.set_token_cost(2).is_err());
    }

    #[tokio::test]
    async fn outcome_awaits_a_worker_driven_terminal_state() {
        let call = Arc::new(ApiCall::builder(ok_endpoint()).build().unwrap());
        let waiter = {
            let call = Arc::clone(&call);
            tokio::spawn(async move { call.outcome().await })
        };
        tokio::task::yield_now().await;
        call.invoke().await;
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn terminal_hook_fires_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let call = ApiCall::builder(ok_endpoint())
            .on_terminal(move |_| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        call.invoke().await;
        Event::cancel(&call);
        call.invoke().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_wrapper_counts_attempts() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let failures_left = Arc::new(AtomicU32::new(2));
        let failures = Arc::clone(&failures_left);
        let endpoint = sdk_endpoint(move |request| -> BoxFuture<'static, ApiResult<Value>> {
            let failures = Arc::clone(&failures);
            Box::pin(async move {
                if failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    Err(ApiError::server("flaky"))
                } else {
                    Ok(request)
                }
            })
        });

        let retry = RetryPolicy::builder()
            .base_delay(std::time::Duration::from_millis(1))
            .jitter(false)
            .max_retries(3)
            .build()
            .unwrap();
        let call = ApiCall::builder(endpoint).retry(retry).build().unwrap();
        call.invoke().await;

        assert_eq!(call.status(), EventStatus::Succeeded);
        assert_eq!(call.attempts(), 3);
    }

    #[tokio::test]
    async fn zero_token_cost_is_rejected_at_build() {
        let err = ApiCall::builder(ok_endpoint())
            .token_cost(0)
            .build()
            .unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }
}
