//! The unified error type for the sluice stack.
//!
//! All components, from the token bucket to the model façade, fail with
//! [`ApiError`]. Branching on [`ErrorKind`] replaces per-layer error enums
//! and the `From` boilerplate they would require when layers compose.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of everything that can go wrong on the outbound path.
///
/// The set is closed: transports map onto it at the endpoint boundary and
/// the control layers (limiter, breaker, queue) produce their own kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection-level failure (DNS, connect, TLS, broken pipe).
    Transport,
    /// The call exceeded a deadline, or the provider returned 408.
    Timeout,
    /// The provider returned 429.
    RateLimit,
    /// The provider returned 401 or 403.
    Auth,
    /// The provider returned 404.
    NotFound,
    /// The provider returned 400 or another non-retryable 4xx.
    BadRequest,
    /// The provider returned 5xx.
    Server,
    /// A 2xx response whose body could not be decoded.
    BadResponse,
    /// Rejected by an open circuit breaker.
    CircuitOpen,
    /// An enqueue timed out against a full queue.
    Backpressure,
    /// Operation attempted against a stopped/closed/consumed resource.
    InvalidState,
    /// Invalid configuration or argument, detected at construction.
    InvalidArgument,
    /// The work was cancelled before reaching a terminal state.
    Cancelled,
}

impl ErrorKind {
    /// Whether errors of this kind are transient and worth retrying.
    ///
    /// This is the default classification used by `RetryPolicy`; policies
    /// may override it with explicit kind sets.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport | ErrorKind::Timeout | ErrorKind::RateLimit | ErrorKind::Server
        )
    }

    /// Stable lowercase label, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Server => "server",
            ErrorKind::BadResponse => "bad_response",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Backpressure => "backpressure",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// The kinds `RetryPolicy` retries unless configured otherwise.
    pub fn default_retry_set() -> HashSet<ErrorKind> {
        [
            ErrorKind::Transport,
            ErrorKind::Timeout,
            ErrorKind::RateLimit,
            ErrorKind::Server,
        ]
        .into_iter()
        .collect()
    }

    /// The kinds `RetryPolicy` re-raises unmodified unless configured
    /// otherwise.
    pub fn default_exclude_set() -> HashSet<ErrorKind> {
        [ErrorKind::Auth, ErrorKind::NotFound, ErrorKind::BadRequest]
            .into_iter()
            .collect()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error on the outbound-call path.
///
/// Carries the classified [`ErrorKind`], a human message, the raw provider
/// payload when one was returned, and the provider's `Retry-After` hint
/// when present.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Provider-specific payload (decoded response body), when available.
    pub provider_payload: Option<serde_json::Value>,
    /// Provider-suggested wait before retrying, when available.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_payload: None,
            retry_after: None,
        }
    }

    /// Attaches the provider's response payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.provider_payload = Some(payload);
        self
    }

    /// Attaches the provider's `Retry-After` hint.
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    /// Whether this error is transient per [`ErrorKind::is_retryable`].
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    pub fn bad_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadResponse, message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, message)
    }

    pub fn backpressure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Backpressure, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}

/// Result alias used across the stack.
pub type ApiResult<T> = Result<T, ApiError>;
