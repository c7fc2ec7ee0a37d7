use serde::{Deserialize, Serialize};
use sluice_core::{ApiError, ApiResult};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// How an endpoint reaches its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Serialize the request and issue it over HTTP.
    Http,
    /// Dispatch the request to an injected provider-SDK handler.
    Sdk,
}

/// How the API key is presented to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// No authentication header.
    None,
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// `x-api-key: <key>`.
    XApiKey,
    /// HTTP basic auth; the key material is `user:password`.
    Basic,
}

/// API key material, held opaquely.
///
/// Neither `Debug` nor `Display` reveal the key, so it cannot leak
/// through logs or error messages.
#[derive(Clone, Default)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps key material.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building auth headers.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    /// Whether any key material is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ApiKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ApiKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Immutable configuration of an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub(crate) provider: String,
    pub(crate) transport: TransportKind,
    pub(crate) base_url: Option<String>,
    pub(crate) path: String,
    pub(crate) method: String,
    pub(crate) content_type: String,
    pub(crate) auth: AuthScheme,
    pub(crate) default_headers: HashMap<String, String>,
    pub(crate) timeout: Duration,
    pub(crate) max_retries_hint: u32,
    pub(crate) client_options: HashMap<String, serde_json::Value>,
    #[serde(skip)]
    pub(crate) api_key: ApiKey,
}

impl EndpointConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> EndpointConfigBuilder {
        EndpointConfigBuilder::new()
    }

    /// Provider name.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Transport kind.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Suggested retry count for callers composing their own policy.
    pub fn max_retries_hint(&self) -> u32 {
        self.max_retries_hint
    }

    /// The key this endpoint contributes to a keyed rate limiter.
    pub fn limiter_key(&self) -> String {
        format!("{}:{}", self.provider, self.path)
    }
}

/// Builder for [`EndpointConfig`].
pub struct EndpointConfigBuilder {
    provider: String,
    transport: TransportKind,
    base_url: Option<String>,
    path: String,
    method: String,
    content_type: String,
    auth: AuthScheme,
    default_headers: HashMap<String, String>,
    timeout: Duration,
    max_retries_hint: u32,
    client_options: HashMap<String, serde_json::Value>,
    api_key: ApiKey,
}

impl Default for EndpointConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - transport: Http
    /// - method: POST
    /// - content_type: application/json
    /// - auth: None
    /// - timeout: 300 seconds
    /// - max_retries_hint: 3
    pub fn new() -> Self {
        Self {
            provider: String::new(),
            transport: TransportKind::Http,
            base_url: None,
            path: String::new(),
            method: "POST".to_string(),
            content_type: "application/json".to_string(),
            auth: AuthScheme::None,
            default_headers: HashMap::new(),
            timeout: Duration::from_secs(300),
            max_retries_hint: 3,
            client_options: HashMap::new(),
            api_key: ApiKey::default(),
        }
    }

    /// Sets the provider name (required).
    pub fn provider<S: Into<String>>(mut self, provider: S) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the transport kind.
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the base URL (required for HTTP transport).
    pub fn base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the request path, joined onto the base URL.
    pub fn path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the HTTP method.
    pub fn method<S: Into<String>>(mut self, method: S) -> Self {
        self.method = method.into();
        self
    }

    /// Sets the request content type.
    pub fn content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets the auth scheme.
    pub fn auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    /// Adds a header sent with every request.
    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    /// Replaces the default header map wholesale.
    pub fn default_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.default_headers = headers;
        self
    }

    /// Sets the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the suggested retry count carried in the config.
    pub fn max_retries_hint(mut self, hint: u32) -> Self {
        self.max_retries_hint = hint;
        self
    }

    /// Adds a transport-construction option (e.g.
    /// `pool_max_idle_per_host`, `connect_timeout_seconds`,
    /// `user_agent`).
    pub fn client_option<K: Into<String>>(mut self, name: K, value: serde_json::Value) -> Self {
        self.client_options.insert(name.into(), value);
        self
    }

    /// Sets the API key material.
    pub fn api_key<K: Into<ApiKey>>(mut self, key: K) -> Self {
        self.api_key = key.into();
        self
    }

    /// Validates the configuration.
    pub fn build(self) -> ApiResult<EndpointConfig> {
        if self.provider.is_empty() {
            return Err(ApiError::invalid_argument("endpoint provider is required"));
        }
        if self.timeout.is_zero() {
            return Err(ApiError::invalid_argument(
                "endpoint timeout must be greater than zero",
            ));
        }
        if reqwest::Method::from_bytes(self.method.as_bytes()).is_err() {
            return Err(ApiError::invalid_argument(format!(
                "invalid http method {:?}",
                self.method
            )));
        }
        if self.transport == TransportKind::Http {
            match &self.base_url {
                Some(url) if !url.is_empty() => {}
                _ => {
                    return Err(ApiError::invalid_argument(
                        "http endpoints require a base_url",
                    ))
                }
            }
        }
        if self.auth != AuthScheme::None && self.api_key.is_empty() {
            return Err(ApiError::invalid_argument(
                "auth scheme requires api key material",
            ));
        }

        Ok(EndpointConfig {
            provider: self.provider,
            transport: self.transport,
            base_url: self.base_url,
            path: self.path,
            method: self.method,
            content_type: self.content_type,
            auth: self.auth,
            default_headers: self.default_headers,
            timeout: self.timeout,
            max_retries_hint: self.max_retries_hint,
            client_options: self.client_options,
            api_key: self.api_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_never_prints_its_material() {
        let key = ApiKey::new("sk-secret-material");
        assert_eq!(format!("{key}"), "****");
        assert_eq!(format!("{key:?}"), "ApiKey(****)");
    }

    #[test]
    fn http_requires_base_url() {
        let err = EndpointConfig::builder()
            .provider("anthropic")
            .path("/v1/messages")
            .build()
            .unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn auth_requires_key_material() {
        let err = EndpointConfig::builder()
            .provider("anthropic")
            .base_url("https://api.anthropic.com")
            .auth(AuthScheme::Bearer)
            .build()
            .unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn invalid_method_is_rejected() {
        let err = EndpointConfig::builder()
            .provider("anthropic")
            .base_url("https://api.anthropic.com")
            .method("NOT A METHOD")
            .build()
            .unwrap_err();
        assert_eq!(err.kind, sluice_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn limiter_key_combines_provider_and_path() {
        let config = EndpointConfig::builder()
            .provider("anthropic")
            .base_url("https://api.anthropic.com")
            .path("/v1/messages")
            .build()
            .unwrap();
        assert_eq!(config.limiter_key(), "anthropic:/v1/messages");
    }

    #[test]
    fn sdk_transport_needs_no_base_url() {
        let config = EndpointConfig::builder()
            .provider("anthropic")
            .transport(TransportKind::Sdk)
            .build()
            .unwrap();
        assert_eq!(config.transport(), TransportKind::Sdk);
    }
}
