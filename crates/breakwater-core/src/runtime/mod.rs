//! Client facade, background scheduling, and graceful shutdown.

use crate::{
    cache::CacheStats,
    config::{ClientConfig, FailoverConfig, HealthConfig, ProviderProfile},
    limit::until_utc_midnight,
    metrics::{MetricsCollector, MetricsSnapshot},
    provider::{
        executor::{CallOptions, RpcExecutor},
        failover::{FailoverController, FailoverState},
        health::{HealthMonitor, HealthSnapshot},
        rotation::KeyRotationManager,
        RpcError,
    },
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

/// How often expired cache entries are swept.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Poll step while draining in-flight calls during shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Decrements the in-flight counter when a call future completes or is
/// dropped, so cancelled calls never leak a drain slot.
struct InFlightGuard {
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`BreakwaterClient`].
#[derive(Debug)]
pub struct BreakwaterClientBuilder {
    providers: Vec<ProviderProfile>,
    failover: FailoverConfig,
    health: HealthConfig,
    shutdown_grace_ms: u64,
}

impl Default for BreakwaterClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakwaterClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            failover: FailoverConfig::default(),
            health: HealthConfig::default(),
            shutdown_grace_ms: 5_000,
        }
    }

    /// Appends a provider; the first one registered is the primary.
    #[must_use]
    pub fn provider(mut self, profile: ProviderProfile) -> Self {
        self.providers.push(profile);
        self
    }

    #[must_use]
    pub fn failover_threshold(mut self, threshold: u32) -> Self {
        self.failover.failover_threshold = threshold;
        self
    }

    #[must_use]
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health.interval_seconds = interval.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Validates the assembled configuration and constructs the client.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] for any invalid configuration; no
    /// client instance exists in that case.
    pub fn build(self) -> Result<BreakwaterClient, RpcError> {
        BreakwaterClient::new(ClientConfig {
            providers: self.providers,
            failover: self.failover,
            health: self.health,
            shutdown_grace_ms: self.shutdown_grace_ms,
        })
    }
}

/// Resilient multi-provider JSON-RPC client.
///
/// Owns one [`RpcExecutor`] per configured provider, the
/// [`FailoverController`] routing between them, the [`HealthMonitor`], and
/// the background timers (health probes, cache sweeps, UTC-midnight rate
/// counter resets). All background work stops when [`shutdown`] runs.
///
/// [`shutdown`]: BreakwaterClient::shutdown
pub struct BreakwaterClient {
    controller: Arc<FailoverController>,
    monitor: Arc<HealthMonitor>,
    metrics: Arc<MetricsCollector>,
    shutdown_tx: broadcast::Sender<()>,
    background_tasks: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
    shutdown_initiated: Arc<AtomicBool>,
    shutdown_grace: Duration,
}

impl BreakwaterClient {
    /// Creates a builder; the recommended construction path.
    #[must_use]
    pub fn builder() -> BreakwaterClientBuilder {
        BreakwaterClientBuilder::new()
    }

    /// Constructs the client from a complete configuration.
    ///
    /// Background tasks start immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] when validation fails; the client
    /// is never partially constructed.
    pub fn new(config: ClientConfig) -> Result<Self, RpcError> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new());
        let executors: Vec<Arc<RpcExecutor>> = config
            .providers
            .iter()
            .map(|profile| {
                RpcExecutor::new(profile.clone(), Arc::clone(&metrics)).map(Arc::new)
            })
            .collect::<Result<_, _>>()?;

        let controller = Arc::new(FailoverController::new(
            executors,
            &config.failover,
            Arc::clone(&metrics),
        )?);
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&controller),
            Arc::clone(&metrics),
            config.health.interval(),
        ));

        let (shutdown_tx, _) = broadcast::channel(4);

        let mut background_tasks = Vec::new();
        background_tasks.push(monitor.start(shutdown_tx.subscribe()));
        background_tasks.push(Self::start_cache_sweeper(
            Arc::clone(&controller),
            shutdown_tx.subscribe(),
        ));
        background_tasks.push(Self::start_daily_reset(
            Arc::clone(&controller),
            shutdown_tx.subscribe(),
        ));

        info!(
            providers = config.providers.len(),
            primary = %config.providers[0].name,
            "breakwater client started"
        );

        Ok(Self {
            controller,
            monitor,
            metrics,
            shutdown_tx,
            background_tasks,
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Issues a JSON-RPC call through the active provider.
    ///
    /// # Errors
    ///
    /// See [`RpcError`]; provider failures are retried and failed over before
    /// anything surfaces here.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        self.call_with_options(method, params, CallOptions::default()).await
    }

    /// Same as [`call`](Self::call) with an explicit per-call deadline.
    ///
    /// Dropping the returned future cancels the in-flight transport request
    /// and releases all pool and limiter bookkeeping.
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
        let _guard = InFlightGuard::new(Arc::clone(&self.in_flight));
        self.controller.call_with_options(method, params, options).await
    }

    /// Rotates one provider's credential with validate-then-commit semantics.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] for an unknown provider name,
    /// otherwise whatever the rotation probe surfaced. The live credential is
    /// untouched on any failure.
    pub async fn rotate_credentials(
        &self,
        provider: &str,
        new_credential: &str,
    ) -> Result<(), RpcError> {
        let executor = self
            .controller
            .executors()
            .iter()
            .find(|executor| &*executor.name() == provider)
            .cloned()
            .ok_or_else(|| RpcError::InvalidConfig(format!("unknown provider {provider}")))?;

        KeyRotationManager::new(executor).rotate(new_credential).await
    }

    /// Latest health snapshots, primary first.
    #[must_use]
    pub fn health(&self) -> Vec<HealthSnapshot> {
        self.monitor.snapshots()
    }

    /// Runs one on-demand probe round across all providers.
    pub async fn check_health_now(&self) {
        self.monitor.check_all().await;
    }

    /// Current failover state.
    #[must_use]
    pub fn failover_state(&self) -> FailoverState {
        self.controller.state()
    }

    /// JSON-exportable metrics snapshot.
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Prometheus text exposition of all recorded metrics.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        self.metrics.render_prometheus()
    }

    /// Per-provider cache statistics, primary first.
    #[must_use]
    pub fn cache_stats(&self) -> Vec<(Arc<str>, CacheStats)> {
        self.controller
            .executors()
            .iter()
            .map(|executor| (executor.name(), executor.cache_stats()))
            .collect()
    }

    /// Number of calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Gracefully shuts the client down.
    ///
    /// Stops all background timers, waits up to the configured grace period
    /// for in-flight calls to drain, then drops the pooled connections. A
    /// call still running past the grace period is allowed to finish but is
    /// not awaited. Idempotent.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("initiating client shutdown");
        if self.shutdown_tx.send(()).is_err() {
            debug!("no background tasks were listening for shutdown");
        }

        for task in self.background_tasks {
            match tokio::time::timeout(Duration::from_secs(1), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(error = %e, "background task failed during shutdown"),
                Err(_) => debug!("background task did not stop within a second, detaching"),
            }
        }

        let drain_started = std::time::Instant::now();
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if drain_started.elapsed() >= self.shutdown_grace {
                warn!(
                    remaining = self.in_flight.load(Ordering::SeqCst),
                    "grace period elapsed with calls still in flight, not awaiting them"
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!("client shutdown complete");
    }

    /// Periodically sweeps expired cache entries across every provider.
    fn start_cache_sweeper(
        controller: Arc<FailoverController>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            // The first tick fires immediately; skip it so a freshly started
            // client does not sweep an empty cache.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for executor in controller.executors() {
                            let removed = executor.cache_cleanup();
                            if removed > 0 {
                                debug!(
                                    provider = %executor.name(),
                                    removed,
                                    "swept expired cache entries"
                                );
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("cache sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Resets daily rate-limit counters at each UTC midnight.
    fn start_daily_reset(
        controller: Arc<FailoverController>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let until_reset = until_utc_midnight(chrono::Utc::now());
                tokio::select! {
                    () = tokio::time::sleep(until_reset) => {
                        for executor in controller.executors() {
                            executor.reset_daily_limits();
                        }
                        info!("daily rate-limit counters reset");
                        // Step past midnight so the next computation targets
                        // tomorrow instead of re-firing immediately.
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("daily reset task shutting down");
                        break;
                    }
                }
            }
        })
    }
}
