//! Circuit breaker for outbound calls.
//!
//! The breaker supervises a downstream dependency and short-circuits
//! calls while it is unhealthy, so a failing provider is not hammered by
//! retries from every caller.
//!
//! ## States
//! - **Closed**: calls pass; consecutive counted failures are tracked.
//! - **Open**: calls fail fast with `CircuitOpen`; after the recovery
//!   time the next admission attempt moves the circuit to half-open.
//! - **HalfOpen**: a bounded number of probes run concurrently; a probe
//!   success closes the circuit, a probe failure re-opens it.
//!
//! The state read and any transition it triggers happen under one lock,
//! so two racing admissions cannot both observe a stale state.
//!
//! ## Example
//!
//! ```rust
//! use sluice_breaker::BreakerConfig;
//! use sluice_core::{ApiError, ErrorKind};
//! use std::time::Duration;
//!
//! # async fn example() -> sluice_core::ApiResult<()> {
//! let breaker = BreakerConfig::builder()
//!     .failure_threshold(3)
//!     .recovery_time(Duration::from_secs(10))
//!     .exclude_kind(ErrorKind::Auth)
//!     .name("anthropic")
//!     .on_state_transition(|from, to| {
//!         eprintln!("breaker: {from:?} -> {to:?}");
//!     })
//!     .build()?;
//!
//! let response = breaker
//!     .execute(|| async { Ok::<_, ApiError>("hello") })
//!     .await?;
//! assert_eq!(response, "hello");
//! # Ok(())
//! # }
//! ```
//!
//! Excluded error kinds (for example `Auth`, which no amount of waiting
//! will fix) count neither as failures nor as successes.

mod circuit;
mod config;
mod events;

pub use circuit::{BreakerSnapshot, CircuitState};
pub use config::{BreakerConfig, BreakerConfigBuilder};
pub use events::BreakerEvent;

use circuit::Circuit;
use sluice_core::{ApiError, ApiResult};
use std::future::Future;
use std::sync::Mutex;

/// A circuit breaker guarding one downstream dependency.
///
/// Cheap to share behind an `Arc`; all state lives under an internal
/// mutex with short, non-suspending critical sections.
pub struct CircuitBreaker {
    circuit: Mutex<Circuit>,
    config: BreakerConfig,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A granted admission; releases its half-open probe slot if the call is
/// cancelled before a result is recorded.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    resolved: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.half_open && !self.resolved {
            self.breaker.circuit.lock().unwrap().release_probe();
        }
    }
}

impl CircuitBreaker {
    pub(crate) fn from_config(config: BreakerConfig) -> Self {
        Self {
            circuit: Mutex::new(Circuit::new()),
            config,
        }
    }

    /// Runs `f` under the breaker's supervision.
    ///
    /// Rejected calls fail with `CircuitOpen` without constructing `f`'s
    /// future. The result of `f` is returned unchanged; its success or
    /// failure is recorded against the circuit, except for error kinds in
    /// the excluded set, which leave the circuit untouched.
    pub async fn execute<T, F, Fut>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut admission = self.admit()?;
        let result = f().await;

        let mut circuit = self.circuit.lock().unwrap();
        match &result {
            Ok(_) => circuit.record_success(&self.config, admission.half_open),
            Err(e) if self.config.excluded_kinds.contains(&e.kind) => {
                if admission.half_open {
                    circuit.release_probe();
                }
            }
            Err(_) => circuit.record_failure(&self.config, admission.half_open),
        }
        admission.resolved = true;

        result
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        self.circuit.lock().unwrap().state()
    }

    /// Point-in-time view of the breaker internals.
    pub fn snapshot(&self) -> BreakerSnapshot {
        self.circuit.lock().unwrap().snapshot()
    }

    /// Forces the circuit open.
    pub fn force_open(&self) {
        self.circuit
            .lock()
            .unwrap()
            .force_state(CircuitState::Open, &self.config);
    }

    /// Forces the circuit closed.
    pub fn force_closed(&self) {
        self.circuit
            .lock()
            .unwrap()
            .force_state(CircuitState::Closed, &self.config);
    }

    /// Resets the circuit to closed with cleared counters.
    pub fn reset(&self) {
        self.force_closed();
    }

    /// The configured name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn admit(&self) -> ApiResult<Admission<'_>> {
        let outcome = self.circuit.lock().unwrap().try_acquire(&self.config);
        if !outcome.admitted {
            return Err(ApiError::circuit_open(format!(
                "circuit breaker '{}' is open",
                self.config.name
            )));
        }
        Ok(Admission {
            breaker: self,
            half_open: outcome.half_open,
            resolved: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        BreakerConfig::builder()
            .failure_threshold(threshold)
            .recovery_time(recovery)
            .name("test")
            .build()
            .unwrap()
    }

    async fn fail(breaker: &CircuitBreaker) -> ApiResult<()> {
        breaker
            .execute(|| async { Err::<(), _>(ApiError::server("boom")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> ApiResult<u32> {
        breaker.execute(|| async { Ok(7) }).await
    }

    #[tokio::test]
    async fn passes_through_while_closed() {
        let breaker = breaker(2, Duration::from_secs(1));
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = breaker(2, Duration::from_secs(1));
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let breaker = breaker(2, Duration::from_secs(1));
        assert!(fail(&breaker).await.is_err());
        assert!(succeed(&breaker).await.is_ok());
        assert!(fail(&breaker).await.is_err());
        // Never two in a row, so still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_without_invoking() {
        let breaker = breaker(1, Duration::from_secs(1));
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = Arc::clone(&invoked);
        let err = breaker
            .execute(|| {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_through_half_open() {
        let breaker = breaker(2, Duration::from_millis(100));

        assert!(fail(&breaker).await.is_err());
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker.execute(|| async { Ok(()) }).await.unwrap_err();
        assert_eq!(rejected.kind, ErrorKind::CircuitOpen);

        tokio::time::advance(Duration::from_millis(150)).await;

        // First admission after the recovery window probes and closes.
        assert_eq!(succeed(&breaker).await.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let breaker = breaker(1, Duration::from_millis(100));
        assert!(fail(&breaker).await.is_err());
        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // The clock restarts from the probe failure.
        let rejected = succeed(&breaker).await.unwrap_err();
        assert_eq!(rejected.kind, ErrorKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_at_most_the_configured_probes() {
        let breaker = Arc::new(
            BreakerConfig::builder()
                .failure_threshold(1)
                .recovery_time(Duration::from_millis(100))
                .half_open_max_calls(1)
                .build()
                .unwrap(),
        );
        assert!(fail(&breaker).await.is_err());
        tokio::time::advance(Duration::from_millis(150)).await;

        let (probe_started_tx, probe_started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let probing = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        probe_started_tx.send(()).unwrap();
                        release_rx.await.unwrap();
                        Ok(1)
                    })
                    .await
            })
        };
        probe_started_rx.await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Second admission exceeds the probe budget.
        let rejected = succeed(&breaker).await.unwrap_err();
        assert_eq!(rejected.kind, ErrorKind::CircuitOpen);

        release_tx.send(()).unwrap();
        assert_eq!(probing.await.unwrap().unwrap(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn excluded_kinds_do_not_count() {
        let breaker = BreakerConfig::builder()
            .failure_threshold(1)
            .recovery_time(Duration::from_secs(1))
            .exclude_kind(ErrorKind::Auth)
            .build()
            .unwrap();

        let err = breaker
            .execute(|| async { Err::<(), _>(ApiError::auth("bad key")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_releases_its_slot() {
        let breaker = Arc::new(breaker(1, Duration::from_millis(100)));
        assert!(fail(&breaker).await.is_err());
        tokio::time::advance(Duration::from_millis(150)).await;

        let hung = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(|| async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        hung.abort();
        let _ = hung.await;

        // The slot freed by the aborted probe admits the next caller.
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn manual_controls() {
        let breaker = breaker(5, Duration::from_secs(30));
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.force_closed();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn state_transition_listener_fires() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let transitions_clone = Arc::clone(&transitions);
        let breaker = BreakerConfig::builder()
            .failure_threshold(1)
            .on_state_transition(move |_, _| {
                transitions_clone.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        assert!(fail(&breaker).await.is_err());
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }
}
