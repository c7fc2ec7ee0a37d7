//! Composable rate limiting, resilience, and outbound-call scheduling.
//!
//! `sluice` is the resource-control core that mediates every outbound
//! call a tool makes to an external HTTP/SDK service. It layers:
//!
//! - a **token-bucket rate limiter** — plain, per-endpoint, and adaptive
//!   ([`limiter`]),
//! - a **circuit breaker** ([`breaker`]),
//! - **retry with exponential backoff and jitter** ([`retry`]),
//! - a **bounded work queue with backpressure** and event executors
//!   ([`queue`]),
//! - an **endpoint/model layer** owning transport sessions and error
//!   classification ([`client`]).
//!
//! Each layer is its own crate and usable alone; this meta crate
//! re-exports the stack and a [`prelude`].
//!
//! ```rust,no_run
//! use sluice::prelude::*;
//! use std::time::Duration;
//!
//! # async fn example() -> sluice::ApiResult<()> {
//! let endpoint = EndpointConfig::builder()
//!     .provider("anthropic")
//!     .base_url("https://api.anthropic.com")
//!     .path("/v1/messages")
//!     .auth(AuthScheme::XApiKey)
//!     .api_key(std::env::var("ANTHROPIC_API_KEY").unwrap_or_default())
//!     .build()?;
//!
//! let limiter = LimiterConfig::builder()
//!     .rate(10)
//!     .period(Duration::from_secs(1))
//!     .build()?;
//!
//! let breaker = BreakerConfig::builder()
//!     .failure_threshold(5)
//!     .recovery_time(Duration::from_secs(30))
//!     .build()?;
//!
//! let retry = RetryPolicy::builder().max_retries(3).build()?;
//!
//! let model = Model::builder()
//!     .endpoint_config(endpoint)
//!     .limiter(std::sync::Arc::new(limiter))
//!     .breaker(std::sync::Arc::new(breaker))
//!     .retry(retry)
//!     .build()?;
//!
//! let mut request = sluice::client::Payload::new();
//! request.insert("prompt".into(), "hello".into());
//!
//! model.scope(|model| async move {
//!     let response = model.send_and_wait(request).await?;
//!     println!("{response}");
//!     Ok(())
//! }).await
//! # }
//! ```

pub use sluice_core::{ApiError, ApiResult, ErrorKind};

/// Error taxonomy and event-listener infrastructure.
pub mod core {
    pub use sluice_core::*;
}

/// Token-bucket rate limiting: plain, keyed, adaptive.
pub mod limiter {
    pub use sluice_limiter::*;
}

/// Circuit breaker.
pub mod breaker {
    pub use sluice_breaker::*;
}

/// Retry with exponential backoff and jitter.
pub mod retry {
    pub use sluice_retry::*;
}

/// Bounded queue and event executors.
pub mod queue {
    pub use sluice_queue::*;
}

/// Endpoints, API calls, and the model façade.
pub mod client {
    pub use sluice_client::*;
}

/// The names most callers need.
pub mod prelude {
    pub use sluice_breaker::{BreakerConfig, CircuitBreaker, CircuitState};
    pub use sluice_client::{
        ApiCall, ApiKey, AuthScheme, Endpoint, EndpointConfig, Model, SendOptions, TransportKind,
    };
    pub use sluice_core::{ApiError, ApiResult, ErrorKind};
    pub use sluice_limiter::{AdaptiveLimiter, EndpointLimiter, LimiterConfig, TokenBucket};
    pub use sluice_queue::{BoundedQueue, Event, EventStatus, Executor, QueueConfig, RateLimitedExecutor};
    pub use sluice_retry::RetryPolicy;
}
