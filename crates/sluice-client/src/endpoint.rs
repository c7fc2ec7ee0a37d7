use crate::config::{AuthScheme, EndpointConfig, TransportKind};
use crate::Payload;
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use sluice_core::{ApiError, ApiResult};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Handler backing an SDK-transport endpoint: receives the request
/// payload and returns the provider's response, already classified.
pub type SdkHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, ApiResult<Value>> + Send + Sync>;

/// The owner of one transport session and the logic that turns a request
/// payload into a response.
///
/// The HTTP session (a pooled `reqwest::Client`) is created lazily on
/// first use and shared by all concurrent calls; `close` drops it, and
/// the next call opens a fresh one. Construction of the session is
/// mutex-guarded so racing first calls still produce exactly one.
pub struct Endpoint {
    config: EndpointConfig,
    session: Mutex<Option<reqwest::Client>>,
    sessions_opened: AtomicU64,
    sdk_handler: Option<SdkHandler>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("provider", &self.config.provider)
            .field("transport", &self.config.transport)
            .field("open", &self.session.lock().unwrap().is_some())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Creates an endpoint from a validated config.
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            sessions_opened: AtomicU64::new(0),
            sdk_handler: None,
        }
    }

    /// Installs the handler an SDK-transport endpoint dispatches to.
    pub fn with_sdk_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Value) -> BoxFuture<'static, ApiResult<Value>> + Send + Sync + 'static,
    {
        self.sdk_handler = Some(Arc::new(handler));
        self
    }

    /// The endpoint's configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Executes one request and returns the normalized response value.
    ///
    /// GET requests carry the payload as query parameters; any other
    /// method sends it as a JSON body. Responses are classified per the
    /// provider-error taxonomy; the body is fully read on every path so
    /// the connection returns to the pool.
    pub async fn call(&self, request: &Payload, cache_control: Option<&str>) -> ApiResult<Value> {
        match self.config.transport {
            TransportKind::Http => self.call_http(request, cache_control).await,
            TransportKind::Sdk => self.call_sdk(request).await,
        }
    }

    /// Closes the session. Idempotent; a later call re-opens.
    pub fn close(&self) {
        if self.session.lock().unwrap().take().is_some() {
            tracing::debug!(provider = %self.config.provider, "http session closed");
        }
    }

    /// How many sessions this endpoint has opened over its lifetime.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Runs `f` against this endpoint, closing the session on every exit
    /// path.
    pub async fn scope<F, Fut, R>(self: &Arc<Self>, f: F) -> ApiResult<R>
    where
        F: FnOnce(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = ApiResult<R>>,
    {
        let result = f(Arc::clone(self)).await;
        self.close();
        result
    }

    async fn call_http(&self, request: &Payload, cache_control: Option<&str>) -> ApiResult<Value> {
        let client = self.session()?;
        let method = Method::from_bytes(self.config.method.as_bytes())
            .map_err(|_| ApiError::invalid_argument(format!("invalid method {:?}", self.config.method)))?;
        let url = self.url()?;

        tracing::debug!(
            provider = %self.config.provider,
            method = %method,
            url = %url,
            "issuing request"
        );

        let mut builder = client
            .request(method.clone(), &url)
            .timeout(self.config.timeout)
            .header(CONTENT_TYPE, &self.config.content_type);
        for (name, value) in &self.config.default_headers {
            builder = builder.header(name, value);
        }
        if let Some(directive) = cache_control {
            builder = builder.header(CACHE_CONTROL, directive);
        }
        builder = self.apply_auth(builder);
        builder = if method == Method::GET {
            builder.query(&query_pairs(request))
        } else {
            builder.json(request)
        };

        let response = builder.send().await.map_err(classify_transport_error)?;
        self.handle_response(response).await
    }

    async fn call_sdk(&self, request: &Payload) -> ApiResult<Value> {
        let handler = self.sdk_handler.as_ref().ok_or_else(|| {
            ApiError::invalid_state("sdk transport configured without a handler")
        })?;
        tracing::debug!(provider = %self.config.provider, "dispatching to sdk handler");
        let work = handler(Value::Object(request.clone()));
        tokio::time::timeout(self.config.timeout, work)
            .await
            .map_err(|_| {
                ApiError::timeout(format!(
                    "sdk call exceeded {:?} timeout",
                    self.config.timeout
                ))
            })?
    }

    async fn handle_response(&self, response: reqwest::Response) -> ApiResult<Value> {
        let status = response.status();
        let headers = response.headers().clone();
        // Reading the whole body on every path drains and releases the
        // connection back to the pool.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::transport(format!("failed to read response body: {e}")))?;

        if status.is_success() {
            let is_json = headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.contains("json"))
                .unwrap_or(false);
            if !is_json {
                return Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()));
            }
            return serde_json::from_slice(&bytes).map_err(|e| {
                ApiError::bad_response(format!("2xx response body failed to decode: {e}"))
            });
        }

        Err(self.classify_status(status, &headers, &bytes))
    }

    fn classify_status(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> ApiError {
        let message = format!(
            "{} returned {} for {}",
            self.config.provider,
            status.as_u16(),
            self.config.path
        );
        let mut error = match status.as_u16() {
            401 | 403 => ApiError::auth(message),
            404 => ApiError::not_found(message),
            408 => ApiError::timeout(message),
            429 => ApiError::rate_limit(message),
            400..=499 => ApiError::bad_request(message),
            _ => ApiError::server(message),
        };
        if let Some(wait) = retry_after(headers) {
            error = error.with_retry_after(wait);
        }
        if let Ok(payload) = serde_json::from_slice::<Value>(body) {
            error = error.with_payload(payload);
        }
        tracing::debug!(
            provider = %self.config.provider,
            status = status.as_u16(),
            kind = error.kind.as_str(),
            "provider error classified"
        );
        error
    }

    fn apply_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        let key = self.config.api_key.expose();
        match self.config.auth {
            AuthScheme::None => builder,
            AuthScheme::Bearer => builder.bearer_auth(key),
            AuthScheme::XApiKey => builder.header("x-api-key", key),
            AuthScheme::Basic => match key.split_once(':') {
                Some((user, password)) => builder.basic_auth(user, Some(password)),
                None => builder.basic_auth(key, Option::<&str>::None),
            },
        }
    }

    /// Returns the shared session, constructing it on first use.
    fn session(&self) -> ApiResult<reqwest::Client> {
        let mut guard = self.session.lock().unwrap();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = self.build_client()?;
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            provider = %self.config.provider,
            session = self.sessions_opened(),
            "http session opened"
        );
        *guard = Some(client.clone());
        Ok(client)
    }

    fn build_client(&self) -> ApiResult<reqwest::Client> {
        let options = &self.config.client_options;
        let mut builder = reqwest::Client::builder().timeout(self.config.timeout);
        if let Some(limit) = options
            .get("pool_max_idle_per_host")
            .and_then(Value::as_u64)
        {
            builder = builder.pool_max_idle_per_host(limit as usize);
        }
        if let Some(seconds) = options
            .get("connect_timeout_seconds")
            .and_then(Value::as_f64)
        {
            builder = builder.connect_timeout(Duration::from_secs_f64(seconds));
        }
        if let Some(agent) = options.get("user_agent").and_then(Value::as_str) {
            builder = builder.user_agent(agent);
        }
        builder
            .build()
            .map_err(|e| ApiError::transport(format!("failed to build http client: {e}")))
    }

    fn url(&self) -> ApiResult<String> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| ApiError::invalid_argument("http endpoint without base_url"))?;
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.config.path.trim_start_matches('/')
        ))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn classify_transport_error(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::timeout(format!("request timed out: {error}"))
    } else if error.is_connect() {
        ApiError::transport(format!("connection failed: {error}"))
    } else {
        ApiError::transport(format!("transport error: {error}"))
    }
}

fn query_pairs(request: &Payload) -> Vec<(String, String)> {
    request
        .iter()
        .map(|(name, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), rendered)
        })
        .collect()
}
