//! Automatic failover across an ordered list of providers.

use crate::{
    config::FailoverConfig,
    metrics::MetricsCollector,
    provider::{
        errors::{ProviderFailure, RpcError},
        executor::{CallOptions, RpcExecutor},
    },
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Instant};

/// Mutable failover bookkeeping, owned exclusively by the controller.
#[derive(Debug, Clone, Copy)]
pub struct FailoverState {
    /// Index of the provider currently serving traffic.
    pub active_index: usize,
    /// Whether traffic has left the primary provider.
    pub failover_active: bool,
    pub last_failover: Option<Instant>,
    pub activation_count: u64,
}

impl FailoverState {
    fn new() -> Self {
        Self { active_index: 0, failover_active: false, last_failover: None, activation_count: 0 }
    }
}

/// Routes calls to an ordered list of executors (primary first) and switches
/// the active provider on sustained or failover-class failures.
///
/// Switching happens when the active executor's consecutive-failure count
/// reaches the configured threshold, or immediately when the mapped error is
/// one of `RateLimited`, `QuotaExceeded`, or `ServiceUnavailable`. Traffic
/// returns to the primary once the health monitor reports a successful
/// health-checked probe against it.
pub struct FailoverController {
    executors: Vec<Arc<RpcExecutor>>,
    state: Mutex<FailoverState>,
    failover_threshold: u32,
    metrics: Arc<MetricsCollector>,
}

impl FailoverController {
    /// Builds a controller over pre-constructed executors.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if no executors are supplied.
    pub fn new(
        executors: Vec<Arc<RpcExecutor>>,
        config: &FailoverConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, RpcError> {
        if executors.is_empty() {
            return Err(RpcError::InvalidConfig("at least one executor is required".into()));
        }
        Ok(Self {
            executors,
            state: Mutex::new(FailoverState::new()),
            failover_threshold: config.failover_threshold,
            metrics,
        })
    }

    /// Issues a call through the active provider, failing over as needed.
    ///
    /// # Errors
    ///
    /// Returns the first non-failover error as-is, or
    /// [`RpcError::FailoverExhausted`] with each provider's failure when the
    /// whole list is exhausted within this one logical call.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        self.call_with_options(method, params, CallOptions::default()).await
    }

    /// Same as [`call`](Self::call) with an explicit deadline.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_options(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: CallOptions,
    ) -> Result<serde_json::Value, RpcError> {
        let start_index = self.state.lock().active_index;
        let provider_count = self.executors.len();
        let mut attempts: Vec<ProviderFailure> = Vec::new();

        for hop in 0..provider_count {
            let index = (start_index + hop) % provider_count;
            let executor = &self.executors[index];

            match executor.call_with_options(method, params.clone(), options).await {
                Ok(value) => {
                    return Ok(value);
                }
                Err(error) => {
                    let threshold_reached =
                        executor.consecutive_failures() >= self.failover_threshold;
                    let should_switch = error.triggers_failover() || threshold_reached;

                    if !should_switch {
                        // Application errors, archive misconfiguration, and
                        // the like: another provider would answer the same.
                        return Err(error);
                    }

                    tracing::warn!(
                        provider = %executor.name(),
                        method,
                        error = %error,
                        consecutive_failures = executor.consecutive_failures(),
                        "provider failed, evaluating failover"
                    );
                    attempts.push(ProviderFailure { provider: executor.name(), error });

                    if hop + 1 < provider_count {
                        let next_index = (index + 1) % provider_count;
                        self.switch_to(index, next_index);
                    }
                }
            }
        }

        // A single-provider sweep has nothing to aggregate; surface the
        // provider's own error with its retry-after intact.
        if attempts.len() == 1 {
            let failure = attempts.remove(0);
            return Err(failure.error);
        }
        Err(RpcError::FailoverExhausted { attempts })
    }

    /// Current failover state (copy).
    #[must_use]
    pub fn state(&self) -> FailoverState {
        *self.state.lock()
    }

    /// Index of the provider currently serving traffic.
    #[must_use]
    pub fn active_index(&self) -> usize {
        self.state.lock().active_index
    }

    /// The ordered executors, primary first.
    #[must_use]
    pub fn executors(&self) -> &[Arc<RpcExecutor>] {
        &self.executors
    }

    /// Reverts to the primary provider. Called by the health monitor after
    /// the primary passes a health-checked probe while failover is active.
    pub(crate) fn note_primary_healthy(&self) {
        let mut state = self.state.lock();
        if state.failover_active {
            tracing::info!(
                previous_index = state.active_index,
                "primary provider recovered, reverting failover"
            );
            state.active_index = 0;
            state.failover_active = false;
            drop(state);
            self.metrics.set_active_provider(0);
        }
    }

    /// Places the controller into an active-failover state directly.
    #[cfg(test)]
    pub(crate) fn force_failover(&self, index: usize) {
        let mut state = self.state.lock();
        state.active_index = index;
        state.failover_active = index != 0;
    }

    fn switch_to(&self, from_index: usize, to_index: usize) {
        let mut state = self.state.lock();
        // Another in-flight call may have already advanced the index; only
        // record a fresh activation when this call moves it.
        if state.active_index == from_index {
            state.active_index = to_index;
            state.failover_active = to_index != 0;
            state.last_failover = Some(Instant::now());
            state.activation_count += 1;
            drop(state);

            let from = self.executors[from_index].name();
            let to = self.executors[to_index].name();
            tracing::warn!(from = %from, to = %to, "failover activated");
            self.metrics.record_failover(&from, &to);
            self.metrics.set_active_provider(to_index);
        }
    }

    /// Aggregate health signal: `true` while any provider's circuit admits
    /// traffic.
    #[must_use]
    pub fn any_provider_available(&self) -> bool {
        use crate::provider::circuit_breaker::CircuitState;
        self.executors
            .iter()
            .any(|executor| executor.circuit_status().state != CircuitState::Open)
    }
}
