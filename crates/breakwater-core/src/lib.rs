//! # Breakwater Core
//!
//! Resilient JSON-RPC transport for multi-chain wallets. Breakwater issues
//! calls to third-party blockchain gateways (Ankr, Infura, Alchemy, or any
//! JSON-RPC 2.0 endpoint) and guarantees bounded latency, bounded cost, and
//! graceful degradation under provider failure.
//!
//! This crate provides:
//!
//! - **[`limit`]**: per-provider rate limiting with three interchangeable
//!   strategies (sliding window, token bucket, compute-unit budgeting).
//!
//! - **[`provider`]**: the transport core: circuit breakers, a bounded
//!   connection pool, the fixed error taxonomy, per-provider executors,
//!   automatic failover, health monitoring, and credential rotation.
//!
//! - **[`cache`]**: LRU+TTL response caching for allow-listed read-only
//!   methods.
//!
//! - **[`metrics`]**: JSON snapshot and Prometheus text exposition of
//!   request, cache, circuit, rate-limit, and failover metrics.
//!
//! - **[`runtime`]**: the [`BreakwaterClient`] facade owning the background
//!   timers (health probes, cache sweeps, daily quota resets) and graceful
//!   shutdown.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       BreakwaterClient                        │
//! │  ┌──────────────────┐  ┌───────────────┐  ┌────────────────┐  │
//! │  │FailoverController│  │ HealthMonitor │  │MetricsCollector│  │
//! │  └────────┬─────────┘  └───────┬───────┘  └───────┬────────┘  │
//! │           │                    │                  │           │
//! │  ┌────────▼─────────┐          │           ┌──────▼───────┐   │
//! │  │  RpcExecutor(s)  │◄─────────┘           │ JSON snapshot│   │
//! │  │  one per provider│                      │ Prometheus   │   │
//! │  └────────┬─────────┘                      └──────────────┘   │
//! │           │                                                   │
//! │  ┌────────▼──────────────────────────────────────┐            │
//! │  │ cache → rate limiter → circuit breaker → pool │            │
//! │  └───────────────────────────────────────────────┘            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Call Flow
//!
//! ```text
//! call(method, params)
//!       │
//!       ▼
//! ┌─────────────┐
//! │ Cache Check │ ─── Hit ──► Cached Response
//! └──────┬──────┘
//!        │ Miss
//!        ▼
//! ┌─────────────┐
//! │ RateLimiter │ ─── Denied ──► RateLimited{retry_after}
//! └──────┬──────┘
//!        │ Allowed
//!        ▼
//! ┌───────────────┐
//! │CircuitBreaker │ ─── Open ──► fail fast / failover
//! └──────┬────────┘
//!        │
//!        ▼
//! ┌───────────────┐     ┌─────────────┐
//! │ConnectionPool │ ──► │ HTTPS POST  │
//! └──────┬────────┘     └──────┬──────┘
//!        │                     │
//!        ▼                     ▼
//!  ErrorMapper ◄──── transport / HTTP / RPC error
//!        │
//!        ├─ retryable ──► exponential backoff, retry
//!        ├─ failover-class ──► next provider
//!        └─ success ──► record + cache + respond
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use breakwater_core::{
//!     config::{Credential, EndpointTemplate, ProviderProfile, RateLimitConfig},
//!     BreakwaterClient,
//! };
//!
//! # async fn run() -> Result<(), breakwater_core::RpcError> {
//! let profile = ProviderProfile {
//!     name: "ankr".into(),
//!     chain_id: 1,
//!     endpoint: EndpointTemplate::new("rpc.ankr.com", "eth"),
//!     credential: Credential::new("my-api-key"),
//!     archive_mode: false,
//!     rate_limit: RateLimitConfig::SlidingWindow {
//!         requests_per_second: 30,
//!         burst_limit: 100,
//!         daily_limit: Some(1_000_000),
//!     },
//!     circuit_breaker: Default::default(),
//!     cache: Default::default(),
//!     pool: Default::default(),
//!     retry: Default::default(),
//!     request_timeout_ms: 30_000,
//!     degraded_latency_ms: 2_000,
//! };
//!
//! let client = BreakwaterClient::builder().provider(profile).build()?;
//! let block = client.call("eth_blockNumber", None).await?;
//! println!("tip: {block}");
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod limit;
pub mod metrics;
pub mod provider;
pub mod runtime;
pub mod types;
pub mod utils;

pub use provider::{CallOptions, FailoverState, HealthSnapshot, RpcError};
pub use runtime::{BreakwaterClient, BreakwaterClientBuilder};
