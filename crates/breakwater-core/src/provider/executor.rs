//! Single-provider request execution.
//!
//! [`RpcExecutor`] owns everything one provider needs: its profile (swappable
//! for credential rotation), rate limiter, circuit breaker, connection pool,
//! response cache, and latency stats. One executor exists per configured
//! provider and none of that state is shared across providers.
//!
//! # Call pipeline
//!
//! ```text
//! call(method, params)
//!   │
//!   ├─ cache lookup (allow-listed methods) ── hit ──► return
//!   │
//!   ├─ rate limiter allow ── denied ──► RateLimited{retry_after}
//!   │
//!   ├─ circuit breaker ── open ──► ServiceUnavailable (fail fast)
//!   │     │
//!   │     └─ connection pool ──► HTTPS POST ──► error mapping
//!   │
//!   ├─ retryable and attempts left ──► exponential backoff, loop
//!   │
//!   └─ success ──► record limiter, cache, latency, telemetry
//! ```
//!
//! The rate limiter is consulted before the circuit breaker, always: a denied
//! call must not consume the half-open probe slot of a recovering provider.

use crate::{
    cache::{CacheStats, ResponseCache},
    config::ProviderProfile,
    limit::{Decision, RateLimiter},
    metrics::MetricsCollector,
    provider::{
        circuit_breaker::{CircuitBreaker, CircuitStatus},
        errors::RpcError,
        http_pool::{HttpExchange, HttpPool},
        latency::LatencyTracker,
        telemetry::RateLimitTelemetry,
    },
    types::{JsonRpcRequest, JsonRpcResponse, RequestContext},
    utils::cache_key,
};
use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Per-call options supplied by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Total budget for the call including retries and backoff waits. The
    /// caller can also cancel at any time by dropping the call future; RAII
    /// guards release pool and breaker bookkeeping on drop.
    pub deadline: Option<Duration>,
}

/// Executes JSON-RPC calls against one provider gateway.
pub struct RpcExecutor {
    profile: ArcSwap<ProviderProfile>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    cache: ResponseCache,
    pool: HttpPool,
    latency: LatencyTracker,
    metrics: Arc<MetricsCollector>,
    /// Consecutive failed calls; read by the failover controller.
    consecutive_failures: AtomicU32,
    /// Last telemetry extracted from provider response headers.
    telemetry: Mutex<RateLimitTelemetry>,
    next_request_id: AtomicU64,
}

impl RpcExecutor {
    /// Builds an executor for one provider profile.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if the profile fails validation or
    /// the HTTP client cannot be constructed.
    pub fn new(profile: ProviderProfile, metrics: Arc<MetricsCollector>) -> Result<Self, RpcError> {
        profile.validate()?;

        let limiter = RateLimiter::from_config(&profile.rate_limit);
        let breaker = CircuitBreaker::new(&profile.circuit_breaker);
        let cache = ResponseCache::new(&profile.cache)?;
        let pool = HttpPool::new(&profile.pool, profile.request_timeout())?;

        Ok(Self {
            profile: ArcSwap::from_pointee(profile),
            limiter,
            breaker,
            cache,
            pool,
            latency: LatencyTracker::new(256),
            metrics,
            consecutive_failures: AtomicU32::new(0),
            telemetry: Mutex::new(RateLimitTelemetry::default()),
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Provider name from the current profile.
    #[must_use]
    pub fn name(&self) -> Arc<str> {
        self.profile.load().name.clone()
    }

    /// Current profile (cheap `ArcSwap` load).
    #[must_use]
    pub fn profile(&self) -> Arc<ProviderProfile> {
        self.profile.load_full()
    }

    /// Atomically replaces the profile. Only rotation calls this, and only
    /// after the candidate profile passed a health probe.
    pub(crate) fn swap_profile(&self, profile: ProviderProfile) {
        self.profile.store(Arc::new(profile));
    }

    /// Issues one JSON-RPC call with the default options.
    ///
    /// # Errors
    ///
    /// See [`RpcError`] for the taxonomy; retryable failures are retried up to
    /// the profile's cap before surfacing.
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        self.call_with_options(method, params, CallOptions::default()).await
    }

    /// Issues one JSON-RPC call with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Timeout`] once the deadline budget is exhausted,
    /// otherwise the mapped provider error.
    pub async fn call_with_options(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        options: CallOptions,
    ) -> Result<serde_json::Value, RpcError> {
        let profile = self.profile.load_full();
        let mut ctx = RequestContext::new(
            self.next_request_id.fetch_add(1, Ordering::Relaxed),
            method,
            profile.is_cacheable(method),
            self.limiter.cost_of(method),
        );
        ctx.deadline = options.deadline.map(|budget| Instant::now() + budget);

        let key = cache_key(profile.chain_id, method, params.as_ref());
        if ctx.cacheable {
            if let Some(value) = self.cache.get(key) {
                self.metrics.record_cache_lookup(&profile.name, true);
                tracing::trace!(
                    provider = %profile.name,
                    method,
                    correlation_id = %ctx.correlation_id,
                    "served from cache"
                );
                return Ok(value);
            }
            self.metrics.record_cache_lookup(&profile.name, false);
        }

        loop {
            // Rate limiter first, circuit breaker second. A locally denied
            // call returns immediately; the failover controller decides
            // whether another provider absorbs it.
            if let Decision::Denied { reason, retry_after } = self.limiter.allow(method) {
                self.metrics.record_rate_limit_denial(&profile.name, reason.as_str());
                self.metrics
                    .record_rate_limit_utilization(&profile.name, self.limiter.utilization());
                tracing::debug!(
                    provider = %profile.name,
                    method,
                    reason = %reason,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limiter denied request"
                );
                return Err(RpcError::RateLimited { retry_after });
            }

            let attempt_started = Instant::now();
            let result = self
                .breaker
                .execute(|| self.send_once(&profile, method, params.clone(), &ctx))
                .await;
            self.metrics.record_circuit_state(&profile.name, self.breaker.state());

            match result {
                Ok(value) => {
                    let latency_ms = attempt_started.elapsed().as_millis() as u64;
                    self.limiter.record(method);
                    self.latency.record(latency_ms);
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.metrics.record_success(&profile.name, method, latency_ms);
                    self.metrics
                        .record_rate_limit_utilization(&profile.name, self.limiter.utilization());

                    if ctx.cacheable {
                        if let Err(cache_error) =
                            self.cache.set(key, value.clone(), Some(profile.cache.ttl()))
                        {
                            // Cache failures degrade to a miss, never to the caller.
                            tracing::debug!(
                                provider = %profile.name,
                                method,
                                error = %cache_error,
                                "skipping cache insert"
                            );
                        }
                    }
                    return Ok(value);
                }
                Err(error) => {
                    self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_failure(&profile.name, error.as_str());
                    tracing::warn!(
                        provider = %profile.name,
                        method,
                        correlation_id = %ctx.correlation_id,
                        attempt = ctx.attempt,
                        error = %error,
                        "request attempt failed"
                    );

                    if !error.retryable() || ctx.attempt >= profile.retry.max_retries {
                        return Err(error);
                    }

                    let backoff = match error.suggested_delay() {
                        Some(suggested) => suggested.max(profile.retry.backoff(ctx.attempt)),
                        None => profile.retry.backoff(ctx.attempt),
                    };
                    if let Some(remaining) = ctx.remaining() {
                        if remaining <= backoff {
                            return Err(RpcError::Timeout);
                        }
                    }
                    ctx.attempt += 1;
                    self.metrics.record_retry(&profile.name);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One wire attempt: serialize, send through the pool, map failures,
    /// verify id correlation, ingest telemetry headers.
    async fn send_once(
        &self,
        profile: &ProviderProfile,
        method: &str,
        params: Option<serde_json::Value>,
        ctx: &RequestContext,
    ) -> Result<serde_json::Value, RpcError> {
        let request =
            JsonRpcRequest::new(method, params, serde_json::Value::Number(ctx.request_id.into()));
        let body = serde_json::to_vec(&request)
            .map_err(|e| RpcError::Network(format!("request serialization failed: {e}")))?;

        let mut timeout = self.method_timeout(profile, method);
        if let Some(remaining) = ctx.remaining() {
            if remaining.is_zero() {
                return Err(RpcError::Timeout);
            }
            timeout = timeout.min(remaining);
        }

        let exchange = self.pool.execute(&profile.url(), Bytes::from(body), timeout).await?;
        self.ingest_telemetry(&profile.name, &exchange);

        if !(200..300).contains(&exchange.status) {
            let body_text = String::from_utf8_lossy(&exchange.body);
            return Err(RpcError::from_http_status(exchange.status, &body_text));
        }

        let response: JsonRpcResponse = serde_json::from_slice(&exchange.body)
            .map_err(|e| RpcError::Network(format!("invalid JSON-RPC response: {e}")))?;

        if *response.id != *request.id {
            return Err(RpcError::Network("response id does not match request id".into()));
        }

        if let Some(error) = response.error {
            return Err(RpcError::from_rpc_object(error.code, &error.message));
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Per-method timeout tiers: probe-class methods are cheap and fail fast,
    /// log queries get the long tier, everything else uses the profile value.
    fn method_timeout(&self, profile: &ProviderProfile, method: &str) -> Duration {
        match method {
            "eth_blockNumber" | "eth_chainId" | "eth_gasPrice" | "net_version" => {
                Duration::from_secs(5).min(profile.request_timeout())
            }
            "eth_getLogs" => Duration::from_secs(30).max(profile.request_timeout()),
            _ => profile.request_timeout(),
        }
    }

    fn ingest_telemetry(&self, provider: &str, exchange: &HttpExchange) {
        let telemetry = RateLimitTelemetry::from_headers(&exchange.headers);
        if telemetry.is_empty() {
            return;
        }
        if let Some(utilization) = telemetry.utilization() {
            self.metrics.record_rate_limit_utilization(provider, utilization);
        }
        *self.telemetry.lock() = telemetry;
    }

    /// Most recent provider-reported rate-limit telemetry.
    #[must_use]
    pub fn telemetry(&self) -> RateLimitTelemetry {
        *self.telemetry.lock()
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn circuit_status(&self) -> CircuitStatus {
        self.breaker.status()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Rolling average latency over recent successful requests.
    #[must_use]
    pub fn average_latency_ms(&self) -> Option<u64> {
        self.latency.average()
    }

    /// Latency percentile over recent successful requests.
    #[must_use]
    pub fn latency_percentile(&self, quantile: f64) -> Option<u64> {
        self.latency.percentile(quantile)
    }

    /// Fraction of the local rate budget currently consumed.
    #[must_use]
    pub fn rate_limit_utilization(&self) -> f64 {
        self.limiter.utilization()
    }

    /// Sweeps expired cache entries; driven by the background scheduler.
    pub(crate) fn cache_cleanup(&self) -> usize {
        self.cache.cleanup()
    }

    /// Resets daily rate-limit counters; driven by the UTC-midnight timer.
    pub(crate) fn reset_daily_limits(&self) {
        self.limiter.reset_daily();
    }
}
