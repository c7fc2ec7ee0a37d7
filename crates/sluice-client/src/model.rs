use crate::call::{ApiCall, TerminalHook};
use crate::endpoint::Endpoint;
use crate::Payload;
use serde_json::Value;
use sluice_breaker::CircuitBreaker;
use sluice_core::{ApiError, ApiResult};
use sluice_limiter::{LimiterConfig, TokenBucket};
use sluice_queue::{QueueConfig, RateLimitedExecutor};
use sluice_retry::RetryPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-call options for [`Model::send_with`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Cache-control directive hint passed to the endpoint.
    pub cache_control: Option<String>,
    /// Skip the rate limiter for this call.
    pub bypass_tokens: bool,
    /// Explicit token cost (default 1).
    pub token_cost: Option<u32>,
}

/// High-level "send this request" entry point.
///
/// Composes an [`Endpoint`], a [`RateLimitedExecutor`], and the optional
/// resilience wrappers. `send` returns the [`ApiCall`] for callers that
/// poll; `send_and_wait` awaits the terminal state and re-raises the
/// classified error.
///
/// ```rust,no_run
/// use sluice_client::{EndpointConfig, Model};
/// use serde_json::{Map, Value};
///
/// # async fn example() -> sluice_core::ApiResult<()> {
/// let endpoint = EndpointConfig::builder()
///     .provider("anthropic")
///     .base_url("https://api.anthropic.com")
///     .path("/v1/messages")
///     .api_key("sk-secret")
///     .auth(sluice_client::AuthScheme::XApiKey)
///     .build()?;
///
/// let model = Model::builder().endpoint_config(endpoint).build()?;
/// model.start()?;
///
/// let mut request = Map::new();
/// request.insert("prompt".into(), Value::String("hello".into()));
/// let response = model.send_and_wait(request).await?;
/// println!("{response}");
///
/// model.stop(std::time::Duration::from_secs(5)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Model {
    endpoint: Arc<Endpoint>,
    executor: RateLimitedExecutor<ApiCall>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
    on_terminal: Option<TerminalHook>,
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("endpoint", &self.endpoint)
            .field("breaker", &self.breaker.is_some())
            .field("retry", &self.retry.is_some())
            .finish_non_exhaustive()
    }
}

impl Model {
    /// Creates a new model builder.
    pub fn builder() -> ModelBuilder {
        ModelBuilder {
            endpoint: None,
            limiter: None,
            queue: None,
            breaker: None,
            retry: None,
            on_terminal: None,
        }
    }

    /// The endpoint this model sends through.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Starts the executor.
    pub fn start(&self) -> ApiResult<()> {
        self.executor.start()
    }

    /// Stops the executor, draining in-flight calls up to `timeout`,
    /// then closes the endpoint session.
    pub async fn stop(&self, timeout: Duration) -> ApiResult<()> {
        self.executor.stop(timeout).await?;
        self.endpoint.close();
        Ok(())
    }

    /// Runs `f` with the model started, stopping on every exit path.
    pub async fn scope<F, Fut, R>(&self, f: F) -> ApiResult<R>
    where
        F: FnOnce(Model) -> Fut,
        Fut: Future<Output = ApiResult<R>>,
    {
        self.start()?;
        let result = f(self.clone()).await;
        self.stop(Duration::from_secs(5)).await?;
        result
    }

    /// Builds an [`ApiCall`] for `request` and submits it.
    ///
    /// The returned call is observable immediately; it reaches a
    /// terminal state once a worker runs it (or fails it under
    /// backpressure).
    pub async fn send(&self, request: Payload) -> ApiResult<Arc<ApiCall>> {
        self.send_with(request, SendOptions::default()).await
    }

    /// [`send`](Model::send) with per-call options.
    pub async fn send_with(
        &self,
        request: Payload,
        options: SendOptions,
    ) -> ApiResult<Arc<ApiCall>> {
        let mut builder = ApiCall::builder(Arc::clone(&self.endpoint))
            .request(request)
            .requires_tokens(!options.bypass_tokens);
        if let Some(directive) = options.cache_control {
            builder = builder.cache_control(directive);
        }
        if let Some(cost) = options.token_cost {
            builder = builder.token_cost(cost);
        }
        if let Some(breaker) = &self.breaker {
            builder = builder.breaker(Arc::clone(breaker));
        }
        if let Some(retry) = &self.retry {
            builder = builder.retry(retry.clone());
        }
        if let Some(hook) = &self.on_terminal {
            builder = builder.on_terminal_hook(Arc::clone(hook));
        }

        let call = Arc::new(builder.build()?);
        tracing::debug!(call = %call.id(), provider = %self.endpoint.config().provider(), "submitting call");
        self.executor.submit(Arc::clone(&call)).await?;
        Ok(call)
    }

    /// Sends and awaits the result, re-raising the classified error.
    pub async fn send_and_wait(&self, request: Payload) -> ApiResult<Value> {
        let call = self.send(request).await?;
        call.outcome().await
    }

    /// Looks up a previously submitted call.
    pub fn get(&self, id: Uuid) -> Option<Arc<ApiCall>> {
        self.executor.get(id)
    }

    /// Removes a call from the executor's map, returning it.
    pub fn pop(&self, id: Uuid) -> Option<Arc<ApiCall>> {
        self.executor.pop(id)
    }

    /// The underlying rate-limited executor.
    pub fn executor(&self) -> &RateLimitedExecutor<ApiCall> {
        &self.executor
    }
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    endpoint: Option<Arc<Endpoint>>,
    limiter: Option<Arc<TokenBucket>>,
    queue: Option<QueueConfig>,
    breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<RetryPolicy>,
    on_terminal: Option<TerminalHook>,
}

impl ModelBuilder {
    /// Sets the endpoint (required, one way or another).
    pub fn endpoint(mut self, endpoint: Arc<Endpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Builds an endpoint from a config and uses it.
    pub fn endpoint_config(self, config: crate::EndpointConfig) -> Self {
        self.endpoint(Arc::new(Endpoint::new(config)))
    }

    /// Sets the token bucket every call pays into.
    ///
    /// Default: 50 tokens per second, named after the provider.
    pub fn limiter(mut self, limiter: Arc<TokenBucket>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Sets the queue configuration for the executor.
    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = Some(config);
        self
    }

    /// Wraps every call in a circuit breaker.
    pub fn breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Wraps every call in a retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Registers a callback fired when any call reaches a terminal
    /// state.
    pub fn on_terminal<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ApiCall) + Send + Sync + 'static,
    {
        self.on_terminal = Some(Arc::new(hook));
        self
    }

    /// Validates and builds the model.
    pub fn build(self) -> ApiResult<Model> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| ApiError::invalid_argument("model requires an endpoint"))?;
        let provider = endpoint.config().provider().to_string();

        let queue = match self.queue {
            Some(config) => config,
            None => QueueConfig::builder().name(provider.clone()).build()?,
        };
        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => Arc::new(LimiterConfig::builder().name(provider).build()?),
        };
        let executor = RateLimitedExecutor::new(queue, limiter)?;

        Ok(Model {
            endpoint,
            executor,
            breaker: self.breaker,
            retry: self.retry,
            on_terminal: self.on_terminal,
        })
    }
}
