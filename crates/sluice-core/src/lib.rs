//! Core infrastructure shared by the sluice stack.
//!
//! Every sluice crate speaks the same error language and uses the same
//! observability plumbing; both live here.
//!
//! # Errors
//!
//! [`ApiError`] is the single error type of the whole stack. It pairs a
//! closed [`ErrorKind`] taxonomy with a human-readable message, an optional
//! provider payload, and an optional `Retry-After` hint. Components never
//! define their own error enums; they construct the kind that describes
//! what happened and let callers branch on it:
//!
//! ```rust
//! use sluice_core::{ApiError, ErrorKind};
//!
//! let err = ApiError::rate_limit("provider throttled the request")
//!     .with_retry_after(std::time::Duration::from_secs(2));
//!
//! assert_eq!(err.kind, ErrorKind::RateLimit);
//! assert!(err.kind.is_retryable());
//! ```
//!
//! # Events
//!
//! Each pattern crate defines an event enum implementing [`FlowEvent`] and
//! carries an [`EventListeners`] collection in its config. Listeners are
//! panic-isolated: one misbehaving listener cannot starve the rest.
//!
//! ```rust
//! use sluice_core::events::{EventListeners, FnListener, FlowEvent};
//! use std::time::Instant;
//!
//! #[derive(Debug)]
//! struct Ping { at: Instant }
//!
//! impl FlowEvent for Ping {
//!     fn event_type(&self) -> &'static str { "ping" }
//!     fn timestamp(&self) -> Instant { self.at }
//!     fn source(&self) -> &str { "example" }
//! }
//!
//! let mut listeners = EventListeners::new();
//! listeners.add(FnListener::new(|event: &Ping| {
//!     println!("{} from {}", event.event_type(), event.source());
//! }));
//! listeners.emit(&Ping { at: Instant::now() });
//! ```

pub mod error;
pub mod events;

pub use error::{ApiError, ApiResult, ErrorKind};
pub use events::{EventListener, EventListeners, FlowEvent, FnListener};
