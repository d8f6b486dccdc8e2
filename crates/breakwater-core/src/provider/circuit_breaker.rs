//! Circuit breaker protecting one provider endpoint.

use crate::{config::CircuitBreakerConfig, provider::errors::RpcError};
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    future::Future,
    time::{Duration, Instant},
};

/// Circuit breaker state machine.
///
/// - `Closed` -> `Open`: failure count reaches the threshold inside the
///   monitoring window
/// - `Open` -> `HalfOpen`: recovery timeout expires
/// - `HalfOpen` -> `Closed`: the single probe succeeds
/// - `HalfOpen` -> `Open`: the single probe fails (re-arming the timer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests are allowed through.
    Closed,
    /// Failures exceeded the threshold, requests fail fast.
    Open,
    /// Recovery mode: exactly one in-flight probe is allowed.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of a breaker for dashboards and the metrics exports.
#[derive(Debug, Clone, Copy)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Age of the last recorded failure, if any.
    pub last_failure_age: Option<Duration>,
}

/// Internal mutable state under a single lock.
///
/// Consolidating `failure_count`, `last_failure`, `state`, and the half-open
/// probe flag into one structure keeps every transition atomic.
#[derive(Debug)]
struct BreakerState {
    failure_count: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
    /// Set while the single half-open probe is outstanding.
    probe_in_flight: bool,
}

/// Circuit breaker for one provider.
///
/// In `Open` state, [`execute`](CircuitBreaker::execute) fails fast with
/// [`RpcError::ServiceUnavailable`] without invoking the wrapped operation.
/// In `HalfOpen`, exactly one probe is admitted at a time; concurrent callers
/// fail fast while the probe is outstanding, which prevents a thundering herd
/// from re-opening the circuit on a barely recovered provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<BreakerState>,
    failure_threshold: u32,
    monitoring_window: Duration,
    recovery_timeout: Duration,
}

/// Clears the half-open probe flag if the probe future is dropped before
/// completing (caller cancellation), so the breaker never deadlocks waiting
/// for a probe result that will not arrive.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.write();
            inner.probe_in_flight = false;
        }
    }
}

/// Outcome of the admission check in `execute`.
enum Admission {
    Normal,
    Probe,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            inner: RwLock::new(BreakerState {
                failure_count: 0,
                last_failure: None,
                state: CircuitState::Closed,
                probe_in_flight: false,
            }),
            failure_threshold: config.failure_threshold,
            monitoring_window: config.monitoring_window(),
            recovery_timeout: config.recovery_timeout(),
        }
    }

    /// Returns `true` while the circuit blocks requests.
    #[must_use]
    pub fn is_open(&self) -> bool {
        let inner = self.inner.read();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => false,
            CircuitState::Open => inner
                .last_failure
                .is_none_or(|at| at.elapsed() < self.recovery_timeout),
        }
    }

    /// Current state, transitioning `Open` -> `HalfOpen` if the recovery
    /// timeout has expired.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Point-in-time status for dashboards.
    #[must_use]
    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.read();
        CircuitStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_age: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    /// Runs `op` under circuit protection.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ServiceUnavailable`] without invoking `op` when the
    /// circuit is open or a half-open probe is already outstanding. Otherwise
    /// propagates `op`'s own error after recording it.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, RpcError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let admission = self.try_admit()?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: matches!(admission, Admission::Probe),
        };

        let result = op().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(),
            Err(error) => {
                if error.counts_toward_circuit() {
                    self.on_failure();
                } else {
                    // Not a provider outage (rate limit, auth, application
                    // error): release the probe slot without moving the FSM.
                    self.on_neutral();
                }
            }
        }

        result
    }

    /// Admission check with double-checked locking: the common closed path
    /// takes only the read lock; the open->half-open transition re-checks
    /// under the write lock.
    fn try_admit(&self) -> Result<Admission, RpcError> {
        {
            let inner = self.inner.read();
            match inner.state {
                CircuitState::Closed => return Ok(Admission::Normal),
                CircuitState::HalfOpen | CircuitState::Open => {}
            }
        }

        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(RpcError::ServiceUnavailable { status: None })
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.recovery_timeout);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::warn!("circuit breaker transitioning to half-open");
                    Ok(Admission::Probe)
                } else {
                    Err(RpcError::ServiceUnavailable { status: None })
                }
            }
        }
    }

    /// Records a successful execution, closing the circuit.
    pub fn on_success(&self) {
        let mut inner = self.inner.write();
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.last_failure = None;
                tracing::info!("circuit breaker closed after successful request");
            }
        }
    }

    /// Records a failed execution, opening the circuit at the threshold.
    pub fn on_failure(&self) {
        let mut inner = self.inner.write();
        inner.probe_in_flight = false;
        let now = Instant::now();

        // Failures older than the monitoring window are no longer
        // "consecutive" for threshold purposes.
        if let Some(last) = inner.last_failure {
            if now.saturating_duration_since(last) > self.monitoring_window {
                inner.failure_count = 0;
            }
        }

        inner.failure_count += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!("circuit breaker re-opened after failed probe");
            }
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    tracing::warn!(
                        threshold = self.failure_threshold,
                        "circuit breaker opened after reaching failure threshold"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Releases the probe slot without recording success or failure.
    fn on_neutral(&self) {
        self.inner.write().probe_in_flight = false;
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.read().failure_count
    }
}
