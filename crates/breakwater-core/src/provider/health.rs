//! Periodic background health probes per provider.

use crate::{
    metrics::MetricsCollector,
    provider::{executor::RpcExecutor, failover::FailoverController},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{sync::broadcast, task::JoinHandle, time::interval};
use tracing::{info, warn};

/// Reorg tolerance for the block-number sanity check: a provider may briefly
/// report a tip a few blocks behind what it previously reported without being
/// flagged unhealthy.
const BLOCK_ROLLBACK_TOLERANCE: u64 = 64;

/// Aggregated result of one provider's probe round.
///
/// Produced only by the health monitor; the failover controller and external
/// dashboards read it, nobody else writes it.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub provider: String,
    pub healthy: bool,
    /// Latency above the provider's threshold on an otherwise healthy probe.
    pub degraded: bool,
    pub last_check: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub average_latency_ms: Option<u64>,
    pub latency_p95_ms: Option<u64>,
    pub latest_block: Option<u64>,
}

/// Runs connectivity, functional, and latency probes against every executor
/// on a fixed interval, feeding the failover controller's auto-revert and the
/// metrics exports.
pub struct HealthMonitor {
    controller: Arc<FailoverController>,
    metrics: Arc<MetricsCollector>,
    check_interval: Duration,
    snapshots: DashMap<usize, HealthSnapshot>,
    /// Last block number seen per executor, for monotonic sanity checking.
    last_blocks: DashMap<usize, u64>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(
        controller: Arc<FailoverController>,
        metrics: Arc<MetricsCollector>,
        check_interval: Duration,
    ) -> Self {
        Self {
            controller,
            metrics,
            check_interval,
            snapshots: DashMap::new(),
            last_blocks: DashMap::new(),
        }
    }

    /// Spawns the probe loop; it stops when the shutdown broadcast fires.
    #[must_use]
    pub fn start(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(monitor.check_interval);
            // Skip the immediate first tick; the first probe round runs one
            // interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check_all().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probes every executor once, concurrently. Also exposed for on-demand
    /// checks.
    pub async fn check_all(&self) {
        let executors = self.controller.executors().to_vec();

        let probes = executors
            .iter()
            .enumerate()
            .map(|(index, executor)| async move {
                (index, self.probe_executor(index, executor).await)
            });
        let results = futures::future::join_all(probes).await;

        for (index, snapshot) in results {
            let executor = &executors[index];
            self.metrics.record_provider_health(&snapshot.provider, snapshot.healthy);
            self.metrics.record_circuit_state(&snapshot.provider, executor.circuit_status().state);
            self.metrics
                .record_rate_limit_utilization(&snapshot.provider, executor.rate_limit_utilization());

            if snapshot.healthy {
                info!(
                    provider = %snapshot.provider,
                    latency_ms = snapshot.average_latency_ms,
                    block = snapshot.latest_block,
                    degraded = snapshot.degraded,
                    "health check passed"
                );
                if index == 0 {
                    // One health-checked success on the primary reverts an
                    // active failover.
                    self.controller.note_primary_healthy();
                }
            } else {
                warn!(
                    provider = %snapshot.provider,
                    consecutive_failures = snapshot.consecutive_failures,
                    "health check failed"
                );
            }

            self.snapshots.insert(index, snapshot);
        }
    }

    /// One provider's probe round: connectivity (chain id), functional
    /// (block number, positive and monotonically sane), latency (flagged
    /// degraded above the provider threshold).
    async fn probe_executor(&self, index: usize, executor: &Arc<RpcExecutor>) -> HealthSnapshot {
        let profile = executor.profile();
        let previous_failures = self
            .snapshots
            .get(&index)
            .map(|snapshot| snapshot.consecutive_failures)
            .unwrap_or(0);

        let probe_started = Instant::now();
        let connectivity = executor.call("eth_chainId", None).await;

        let mut healthy = connectivity.is_ok();
        let mut latest_block = None;

        if healthy {
            match executor.call("eth_blockNumber", None).await {
                Ok(value) => match parse_hex_u64(&value) {
                    Some(block) if block > 0 && self.block_is_sane(index, block) => {
                        latest_block = Some(block);
                        self.last_blocks.insert(index, block);
                    }
                    Some(block) => {
                        warn!(
                            provider = %profile.name,
                            block,
                            "functional probe returned an implausible block number"
                        );
                        healthy = false;
                    }
                    None => {
                        warn!(provider = %profile.name, "functional probe returned non-numeric block");
                        healthy = false;
                    }
                },
                Err(error) => {
                    warn!(provider = %profile.name, error = %error, "functional probe failed");
                    healthy = false;
                }
            }
        }

        let probe_latency = probe_started.elapsed();
        let degraded = healthy && probe_latency > profile.degraded_latency();
        if degraded {
            warn!(
                provider = %profile.name,
                latency_ms = probe_latency.as_millis() as u64,
                threshold_ms = profile.degraded_latency_ms,
                "provider latency degraded"
            );
        }

        HealthSnapshot {
            provider: profile.name.to_string(),
            healthy,
            degraded,
            last_check: Utc::now(),
            consecutive_failures: if healthy { 0 } else { previous_failures + 1 },
            average_latency_ms: executor.average_latency_ms(),
            latency_p95_ms: executor.latency_percentile(0.95),
            latest_block,
        }
    }

    /// A new block number is sane if it does not fall more than the reorg
    /// tolerance behind the last one this executor reported.
    fn block_is_sane(&self, index: usize, block: u64) -> bool {
        match self.last_blocks.get(&index) {
            Some(last) => block.saturating_add(BLOCK_ROLLBACK_TOLERANCE) >= *last,
            None => true,
        }
    }

    /// Latest snapshots, ordered by provider index (primary first).
    #[must_use]
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let mut entries: Vec<(usize, HealthSnapshot)> = self
            .snapshots
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(index, _)| *index);
        entries.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    /// Snapshot for one provider index, if a probe round has run.
    #[must_use]
    pub fn snapshot(&self, index: usize) -> Option<HealthSnapshot> {
        self.snapshots.get(&index).map(|entry| entry.value().clone())
    }
}

/// Parses `"0x..."` JSON string values into a u64.
fn parse_hex_u64(value: &serde_json::Value) -> Option<u64> {
    value
        .as_str()
        .and_then(|text| u64::from_str_radix(text.trim_start_matches("0x"), 16).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CacheConfig, Credential, EndpointTemplate, FailoverConfig, ProviderProfile,
        RateLimitConfig,
    };
    use serde_json::json;

    fn mock_profile(name: &str, server: &mockito::ServerGuard) -> ProviderProfile {
        ProviderProfile {
            name: Arc::from(name),
            chain_id: 1,
            endpoint: EndpointTemplate {
                scheme: "http".to_string(),
                ..EndpointTemplate::new(server.host_with_port(), "eth")
            },
            credential: Credential::new(format!("{name}-key")),
            archive_mode: false,
            rate_limit: RateLimitConfig::SlidingWindow {
                requests_per_second: 1_000,
                burst_limit: 10_000,
                daily_limit: None,
            },
            circuit_breaker: Default::default(),
            cache: CacheConfig { cacheable_methods: vec![], ..CacheConfig::default() },
            pool: Default::default(),
            retry: crate::config::RetryConfig { max_retries: 0, base_delay_ms: 10, max_delay_ms: 50 },
            request_timeout_ms: 5_000,
            degraded_latency_ms: 2_000,
        }
    }

    fn monitor_over(profiles: Vec<ProviderProfile>) -> (Arc<HealthMonitor>, Arc<FailoverController>) {
        let metrics = Arc::new(MetricsCollector::new());
        let executors = profiles
            .into_iter()
            .map(|profile| {
                Arc::new(crate::provider::RpcExecutor::new(profile, Arc::clone(&metrics)).unwrap())
            })
            .collect();
        let controller = Arc::new(
            FailoverController::new(
                executors,
                &FailoverConfig { failover_threshold: 3 },
                Arc::clone(&metrics),
            )
            .unwrap(),
        );
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&controller),
            metrics,
            Duration::from_secs(3600),
        ));
        (monitor, controller)
    }

    /// Serves both probe methods, keyed on the request body's method name.
    /// Echoes the request id so correlation checks pass.
    async fn probe_mocks(server: &mut mockito::ServerGuard, key: &str, block_hex: &'static str) {
        server
            .mock("POST", format!("/eth/{key}").as_str())
            .with_status(200)
            .with_body_from_request(move |request| {
                let body = String::from_utf8_lossy(request.body().unwrap());
                let id = serde_json::from_slice::<serde_json::Value>(request.body().unwrap())
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(serde_json::json!(1));
                let result = if body.contains("eth_chainId") { "0x1" } else { block_hex };
                format!(r#"{{"jsonrpc":"2.0","result":"{result}","id":{id}}}"#).into_bytes()
            })
            .expect_at_least(1)
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn healthy_provider_produces_healthy_snapshot() {
        let mut server = mockito::Server::new_async().await;
        probe_mocks(&mut server, "alpha-key", "0x112a880").await;

        let (monitor, _controller) = monitor_over(vec![mock_profile("alpha", &server)]);
        monitor.check_all().await;

        let snapshots = monitor.snapshots();
        assert_eq!(snapshots.len(), 1);
        let snapshot = &snapshots[0];
        assert!(snapshot.healthy);
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.latest_block, Some(0x0112_a880));
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn unreachable_provider_accumulates_failures() {
        let server = mockito::Server::new_async().await;
        // No mocks: every request 501s.
        let (monitor, _controller) = monitor_over(vec![mock_profile("alpha", &server)]);

        monitor.check_all().await;
        monitor.check_all().await;

        let snapshot = monitor.snapshot(0).unwrap();
        assert!(!snapshot.healthy);
        assert_eq!(snapshot.consecutive_failures, 2);
        assert_eq!(snapshot.latest_block, None);
    }

    #[tokio::test]
    async fn zero_block_number_is_unhealthy() {
        let mut server = mockito::Server::new_async().await;
        probe_mocks(&mut server, "alpha-key", "0x0").await;

        let (monitor, _controller) = monitor_over(vec![mock_profile("alpha", &server)]);
        monitor.check_all().await;

        let snapshot = monitor.snapshot(0).unwrap();
        assert!(!snapshot.healthy);
    }

    #[tokio::test]
    async fn primary_success_reverts_active_failover() {
        let mut primary = mockito::Server::new_async().await;
        let mut fallback = mockito::Server::new_async().await;
        probe_mocks(&mut primary, "alpha-key", "0x100").await;
        probe_mocks(&mut fallback, "beta-key", "0x100").await;

        let (monitor, controller) = monitor_over(vec![
            mock_profile("alpha", &primary),
            mock_profile("beta", &fallback),
        ]);

        // Force failover state, then let a healthy probe round revert it.
        controller.force_failover(1);
        monitor.check_all().await;

        assert_eq!(controller.active_index(), 0);
        assert!(!controller.state().failover_active);
    }

    #[tokio::test]
    async fn start_stops_on_shutdown_signal() {
        let server = mockito::Server::new_async().await;
        let (monitor, _controller) = monitor_over(vec![mock_profile("alpha", &server)]);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = monitor.start(shutdown_rx);

        shutdown_tx.send(()).expect("send must succeed");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor must shut down promptly")
            .expect("task must not panic");
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex_u64(&json!("0x10")), Some(16));
        assert_eq!(parse_hex_u64(&json!("0x0")), Some(0));
        assert_eq!(parse_hex_u64(&json!("nope")), None);
        assert_eq!(parse_hex_u64(&json!(16)), None);
    }
}
