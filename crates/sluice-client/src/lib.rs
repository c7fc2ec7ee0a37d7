//! Endpoints, API-call events, and the model façade.
//!
//! This crate is where sluice touches the network. An [`Endpoint`] owns
//! one HTTP session (or an SDK handler) and the logic to turn an opaque
//! request payload into a normalized response, classifying every failure
//! into the stack's error taxonomy. An [`ApiCall`] binds one request to
//! one endpoint and carries its execution record through the executor.
//! The [`Model`] composes endpoint, rate-limited executor, circuit
//! breaker, and retry policy behind a single `send`.
//!
//! # Composition order
//!
//! Retries run inside the circuit breaker, so a request that exhausts
//! its retries registers exactly one failure with the breaker, and a
//! breaker rejection is never retried. `CircuitOpen` and `Backpressure`
//! surface to callers unchanged.
//!
//! # Error propagation
//!
//! Workers never raise: failures are captured into the call's execution
//! record, and callers observe them via [`ApiCall::status`] /
//! [`ApiCall::outcome`]. [`Model::send_and_wait`] re-raises the recorded
//! error at the await point.

mod call;
mod config;
mod endpoint;
mod model;

pub use call::{ApiCall, ApiCallBuilder, TerminalHook};
pub use config::{ApiKey, AuthScheme, EndpointConfig, EndpointConfigBuilder, TransportKind};
pub use endpoint::{Endpoint, SdkHandler};
pub use model::{Model, ModelBuilder, SendOptions};

/// An opaque request payload: a mapping of field name to value.
pub type Payload = serde_json::Map<String, serde_json::Value>;
