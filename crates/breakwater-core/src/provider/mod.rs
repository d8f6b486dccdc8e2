//! Provider-facing transport: execution, protection, and failover.
//!
//! This module holds everything between a caller's `call(method, params)` and
//! the provider gateway on the other side of the wire:
//!
//! - [`errors`]: the fixed error taxonomy with retryability annotations
//! - [`circuit_breaker`]: per-provider failure circuit
//! - [`http_pool`]: bounded connection pool over keep-alive sockets
//! - [`executor`]: the per-provider call pipeline (cache, rate limit,
//!   circuit, pool, retry)
//! - [`failover`]: ordered-provider switching and aggregate errors
//! - [`health`]: periodic probes feeding failover auto-revert
//! - [`rotation`]: validate-then-commit credential swaps
//! - [`telemetry`]: provider rate-limit response headers
//! - [`latency`]: rolling latency statistics

pub mod circuit_breaker;
pub mod errors;
pub mod executor;
pub mod failover;
pub mod health;
pub mod http_pool;
pub mod latency;
pub mod rotation;
pub mod telemetry;

pub use circuit_breaker::{CircuitBreaker, CircuitState, CircuitStatus};
pub use errors::{ProviderFailure, RpcError};
pub use executor::{CallOptions, RpcExecutor};
pub use failover::{FailoverController, FailoverState};
pub use health::{HealthMonitor, HealthSnapshot};
pub use http_pool::{HttpExchange, HttpPool};
pub use latency::LatencyTracker;
pub use rotation::KeyRotationManager;
pub use telemetry::RateLimitTelemetry;
