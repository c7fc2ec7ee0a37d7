//! Token-bucket rate limiting for the sluice stack.
//!
//! Three layers, from plain to adaptive:
//!
//! - [`TokenBucket`]: grant or defer permission proportional to a
//!   requested token cost, refilled continuously at `rate` per `period`.
//! - [`EndpointLimiter`]: a keyed registry of buckets, one per endpoint,
//!   created lazily from shared defaults and reconfigurable at runtime.
//! - [`AdaptiveLimiter`]: adjusts a bucket's rate from the rate-limit
//!   hint headers carried by provider responses.
//!
//! # Basic example
//!
//! ```rust
//! use sluice_limiter::LimiterConfig;
//! use std::time::Duration;
//!
//! # async fn example() -> sluice_core::ApiResult<()> {
//! let bucket = LimiterConfig::builder()
//!     .rate(10)
//!     .period(Duration::from_secs(1))
//!     .name("anthropic")
//!     .build()?;
//!
//! // Pays one token, sleeping if the bucket is empty.
//! let answer = bucket.execute(1, || async { 42 }).await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```
//!
//! # Bursts
//!
//! Buckets start empty and earn tokens while idle, up to the capacity.
//! Capacity defaults to `rate`, so a bucket left alone for one period
//! absorbs a period's worth of calls at once; configure `max_tokens`
//! above `rate` for deeper bursts at the same sustained rate.
//!
//! # Cancellation
//!
//! A waiter that is dropped while sleeping has debited nothing: tokens are
//! only taken at the instant a grant succeeds.

mod adaptive;
mod bucket;
mod config;
mod events;
mod keyed;

pub use adaptive::{AdaptiveConfig, AdaptiveConfigBuilder, AdaptiveLimiter};
pub use bucket::TokenBucket;
pub use config::{LimiterConfig, LimiterConfigBuilder};
pub use events::LimiterEvent;
pub use keyed::EndpointLimiter;
