//! Dual-path metrics: lock-free internal counters plus a Prometheus recorder.
//!
//! Every record site updates two sinks:
//!
//! - Atomic counters/gauges owned by [`MetricsCollector`], aggregated into a
//!   serializable [`MetricsSnapshot`] for JSON dashboards.
//! - The `metrics` facade (counters, gauges, histograms), rendered as a
//!   Prometheus text exposition via the process-wide recorder handle.
//!
//! The Prometheus recorder is installed once per process; additional
//! collectors (throwaway rotation probes, tests) reuse the existing handle.

use crate::provider::circuit_breaker::CircuitState;
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, OnceLock,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                // A recorder is already installed (another library, or a
                // previous client in this process). Fall back to a detached
                // recorder so rendering still works locally.
                tracing::warn!(error = %e, "prometheus recorder already installed, using detached recorder");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Per-provider gauge cells.
#[derive(Debug, Default)]
struct ProviderCells {
    /// `CircuitState` encoded as 0 (closed) / 1 (open) / 2 (half-open).
    circuit_state: AtomicU64,
    /// 1 healthy, 0 unhealthy.
    healthy: AtomicU64,
    /// Rate-limit utilization as f64 bits.
    utilization_bits: AtomicU64,
    errors: AtomicU64,
}

fn encode_state(state: CircuitState) -> u64 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

fn decode_state(value: u64) -> &'static str {
    match value {
        0 => "closed",
        1 => "open",
        _ => "half_open",
    }
}

/// Per-provider entry of the JSON snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSnapshot {
    pub name: String,
    pub circuit_state: String,
    pub healthy: bool,
    pub rate_limit_utilization: f64,
    pub errors: u64,
}

/// Serializable point-in-time view of all metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub success_rate: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub retries_total: u64,
    pub rate_limit_denials: u64,
    pub failover_activations: u64,
    pub active_provider_index: usize,
    pub providers: Vec<ProviderSnapshot>,
}

/// Collects transport metrics for one client instance.
pub struct MetricsCollector {
    requests_total: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    retries_total: AtomicU64,
    rate_limit_denials: AtomicU64,
    failover_activations: AtomicU64,
    active_provider_index: AtomicUsize,
    providers: DashMap<Arc<str>, ProviderCells>,
    prometheus: PrometheusHandle,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
            rate_limit_denials: AtomicU64::new(0),
            failover_activations: AtomicU64::new(0),
            active_provider_index: AtomicUsize::new(0),
            providers: DashMap::new(),
            prometheus: prometheus_handle(),
        }
    }

    pub fn record_success(&self, provider: &str, method: &str, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        counter!("breakwater_requests_total", "provider" => provider.to_string(), "outcome" => "success").increment(1);
        histogram!("breakwater_request_latency_ms", "provider" => provider.to_string(), "method" => method.to_string())
            .record(latency_ms as f64);
    }

    pub fn record_failure(&self, provider: &str, error_kind: &'static str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.cells(provider).errors.fetch_add(1, Ordering::Relaxed);
        counter!("breakwater_requests_total", "provider" => provider.to_string(), "outcome" => "failure").increment(1);
        counter!("breakwater_request_errors_total", "provider" => provider.to_string(), "kind" => error_kind)
            .increment(1);
    }

    pub fn record_cache_lookup(&self, provider: &str, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = if hit { "hit" } else { "miss" };
        counter!("breakwater_cache_lookups_total", "provider" => provider.to_string(), "outcome" => outcome)
            .increment(1);
    }

    pub fn record_retry(&self, provider: &str) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
        counter!("breakwater_retries_total", "provider" => provider.to_string()).increment(1);
    }

    pub fn record_rate_limit_denial(&self, provider: &str, reason: &'static str) {
        self.rate_limit_denials.fetch_add(1, Ordering::Relaxed);
        counter!("breakwater_rate_limit_denials_total", "provider" => provider.to_string(), "reason" => reason)
            .increment(1);
    }

    pub fn record_failover(&self, from: &str, to: &str) {
        self.failover_activations.fetch_add(1, Ordering::Relaxed);
        counter!("breakwater_failover_activations_total", "from" => from.to_string(), "to" => to.to_string())
            .increment(1);
    }

    pub fn set_active_provider(&self, index: usize) {
        self.active_provider_index.store(index, Ordering::Relaxed);
        gauge!("breakwater_active_provider_index").set(index as f64);
    }

    pub fn record_circuit_state(&self, provider: &str, state: CircuitState) {
        self.cells(provider).circuit_state.store(encode_state(state), Ordering::Relaxed);
        let value = match state {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 0.5,
        };
        gauge!("breakwater_circuit_state", "provider" => provider.to_string()).set(value);
    }

    pub fn record_provider_health(&self, provider: &str, healthy: bool) {
        self.cells(provider).healthy.store(u64::from(healthy), Ordering::Relaxed);
        gauge!("breakwater_provider_healthy", "provider" => provider.to_string())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn record_rate_limit_utilization(&self, provider: &str, utilization: f64) {
        self.cells(provider)
            .utilization_bits
            .store(utilization.to_bits(), Ordering::Relaxed);
        gauge!("breakwater_rate_limit_utilization", "provider" => provider.to_string())
            .set(utilization);
    }

    /// Builds the JSON-exportable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let requests_succeeded = self.requests_succeeded.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);

        let mut providers: Vec<ProviderSnapshot> = self
            .providers
            .iter()
            .map(|entry| ProviderSnapshot {
                name: entry.key().to_string(),
                circuit_state: decode_state(entry.circuit_state.load(Ordering::Relaxed))
                    .to_string(),
                healthy: entry.healthy.load(Ordering::Relaxed) == 1,
                rate_limit_utilization: f64::from_bits(
                    entry.utilization_bits.load(Ordering::Relaxed),
                ),
                errors: entry.errors.load(Ordering::Relaxed),
            })
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));

        MetricsSnapshot {
            requests_total,
            requests_succeeded,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            success_rate: ratio(requests_succeeded, requests_total),
            cache_hits,
            cache_misses,
            cache_hit_rate: ratio(cache_hits, cache_hits + cache_misses),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            rate_limit_denials: self.rate_limit_denials.load(Ordering::Relaxed),
            failover_activations: self.failover_activations.load(Ordering::Relaxed),
            active_provider_index: self.active_provider_index.load(Ordering::Relaxed),
            providers,
        }
    }

    /// Renders the Prometheus text exposition.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        self.prometheus.render()
    }

    fn cells(&self, provider: &str) -> dashmap::mapref::one::Ref<'_, Arc<str>, ProviderCells> {
        if let Some(cells) = self.providers.get(provider) {
            return cells;
        }
        self.providers.entry(Arc::from(provider)).or_default().downgrade()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
