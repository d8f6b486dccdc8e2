//! Client configuration: provider profiles and tuning knobs.
//!
//! All configuration is supplied externally as plain structs; this crate
//! performs no file or environment loading. Every struct derives serde so a
//! host application can deserialize profiles from whatever source it owns.
//!
//! # Validation
//!
//! Configuration is validated when a client is constructed. Invalid
//! configurations (no providers, empty credentials, zero limits) surface
//! [`RpcError::InvalidConfig`] and prevent the client from being built at all.

use crate::provider::errors::RpcError;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Methods cached by default: read-only, deterministic for a given key, and
/// cheap to serve stale within a short TTL.
pub const DEFAULT_CACHEABLE_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_chainId",
    "eth_gasPrice",
    "eth_getBlockByHash",
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
];

fn default_cacheable_methods() -> Vec<String> {
    DEFAULT_CACHEABLE_METHODS.iter().map(ToString::to_string).collect()
}

/// Opaque provider credential (API key or project id).
///
/// Wrapped so the key never appears in `Debug` output or log fields.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential(****)")
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self(secret.to_string())
    }
}

/// Provider URL template: `<scheme>://<host>/<network_path>/<credential>`,
/// with archive mode toggling a path suffix on the network segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointTemplate {
    /// Gateway host, e.g. `rpc.ankr.com` or `eth-mainnet.g.alchemy.com`.
    pub host: String,
    /// Network path segment, e.g. `eth` or `v2`.
    pub network_path: String,
    /// Suffix appended to the network path when archive mode is on,
    /// e.g. `-archive`.
    #[serde(default)]
    pub archive_suffix: Option<String>,
    /// URL scheme; production gateways are always `https`.
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_scheme() -> String {
    "https".to_string()
}

impl EndpointTemplate {
    #[must_use]
    pub fn new(host: impl Into<String>, network_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            network_path: network_path.into(),
            archive_suffix: None,
            scheme: default_scheme(),
        }
    }

    /// Renders the full endpoint URL for the given credential.
    #[must_use]
    pub fn url(&self, credential: &Credential, archive_mode: bool) -> String {
        let suffix = if archive_mode {
            self.archive_suffix.as_deref().unwrap_or("")
        } else {
            ""
        };
        if credential.is_empty() {
            format!("{}://{}/{}{}", self.scheme, self.host, self.network_path, suffix)
        } else {
            format!(
                "{}://{}/{}{}/{}",
                self.scheme,
                self.host,
                self.network_path,
                suffix,
                credential.expose()
            )
        }
    }
}

/// Rate-limit strategy and numbers for one provider.
///
/// Selected per provider profile; see [`crate::limit::RateLimiter`] for the
/// strategy implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RateLimitConfig {
    /// Timestamp-log limiter with per-second, burst, and daily caps.
    SlidingWindow {
        requests_per_second: u32,
        /// Cap over the trailing 10-second burst window.
        burst_limit: u32,
        /// Requests allowed since the last UTC midnight, if capped.
        #[serde(default)]
        daily_limit: Option<u64>,
    },
    /// Continuously refilled token bucket for high-throughput providers.
    TokenBucket { requests_per_minute: u32, burst_size: u32 },
    /// Compute-unit budgeting for metered providers (Alchemy-style).
    ComputeUnits {
        units_per_second: u64,
        /// Per-method unit costs; methods not listed fall back to
        /// `default_cost`.
        #[serde(default)]
        method_costs: HashMap<String, u64>,
        default_cost: u64,
    },
}

impl RateLimitConfig {
    pub(crate) fn validate(&self) -> Result<(), RpcError> {
        match self {
            Self::SlidingWindow { requests_per_second, burst_limit, daily_limit } => {
                if *requests_per_second == 0 || *burst_limit == 0 {
                    return Err(RpcError::InvalidConfig(
                        "sliding window caps must be nonzero".into(),
                    ));
                }
                if daily_limit == &Some(0) {
                    return Err(RpcError::InvalidConfig("daily limit must be nonzero".into()));
                }
            }
            Self::TokenBucket { requests_per_minute, burst_size } => {
                if *requests_per_minute == 0 || *burst_size == 0 {
                    return Err(RpcError::InvalidConfig(
                        "token bucket rate and burst must be nonzero".into(),
                    ));
                }
            }
            Self::ComputeUnits { units_per_second, default_cost, .. } => {
                if *units_per_second == 0 {
                    return Err(RpcError::InvalidConfig("unit budget must be nonzero".into()));
                }
                if *default_cost == 0 {
                    return Err(RpcError::InvalidConfig("default unit cost must be nonzero".into()));
                }
            }
        }
        Ok(())
    }
}

/// Circuit breaker thresholds for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures inside the monitoring window before opening.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Failures older than this no longer count as consecutive.
    #[serde(default = "default_monitoring_window_seconds")]
    pub monitoring_window_seconds: u64,
    /// Time spent open before admitting a half-open probe.
    #[serde(default = "default_recovery_timeout_seconds")]
    pub recovery_timeout_seconds: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_monitoring_window_seconds() -> u64 {
    10
}

fn default_recovery_timeout_seconds() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            monitoring_window_seconds: default_monitoring_window_seconds(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn monitoring_window(&self) -> Duration {
        Duration::from_secs(self.monitoring_window_seconds)
    }

    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }
}

/// Response cache sizing and allow-list for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
    /// Methods eligible for caching. Part of configuration, not hardcoded in
    /// the cache manager.
    #[serde(default = "default_cacheable_methods")]
    pub cacheable_methods: Vec<String>,
}

fn default_cache_ttl_ms() -> u64 {
    12_000
}

fn default_cache_max_entries() -> usize {
    2_048
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
            max_entries: default_cache_max_entries(),
            cacheable_methods: default_cacheable_methods(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Connection pool bounds for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent outbound requests.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bounded wait for a pool slot before surfacing
    /// `ConcurrentLimitExceeded`.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> usize {
    16
}

fn default_acquire_timeout_ms() -> u64 {
    500
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Retry policy for one provider's executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base of the exponential backoff: `base * 2^attempt`, capped below.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff for the given zero-based attempt: `base * 2^attempt`, capped.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.min(16));
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Immutable description of one provider gateway.
///
/// Created at client construction and never mutated; credential rotation
/// replaces the whole profile atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Human-readable identifier for metrics and logging.
    pub name: Arc<str>,
    pub chain_id: u64,
    pub endpoint: EndpointTemplate,
    pub credential: Credential,
    /// Whether requests should target the archive path variant.
    #[serde(default)]
    pub archive_mode: bool,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Default per-request timeout; probe-class methods use shorter tiers.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Latency above which health probes flag the provider degraded.
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_degraded_latency_ms() -> u64 {
    2_000
}

impl ProviderProfile {
    /// Renders the endpoint URL for the current credential and archive mode.
    #[must_use]
    pub fn url(&self) -> String {
        self.endpoint.url(&self.credential, self.archive_mode)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn degraded_latency(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_ms)
    }

    /// Returns `true` if responses for `method` may be cached.
    #[must_use]
    pub fn is_cacheable(&self, method: &str) -> bool {
        self.cache.cacheable_methods.iter().any(|m| m == method)
    }

    /// Returns a copy of this profile with a replaced credential.
    ///
    /// Used by rotation to build candidate profiles; the running profile is
    /// only swapped after the candidate passes a health probe.
    #[must_use]
    pub fn with_credential(&self, credential: impl Into<Credential>) -> Self {
        Self { credential: credential.into(), ..self.clone() }
    }

    /// Validates the profile.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] for empty names/hosts/credentials,
    /// unparseable endpoint URLs, or zero-valued limits.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.name.is_empty() {
            return Err(RpcError::InvalidConfig("provider name must not be empty".into()));
        }
        if self.chain_id == 0 {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: chain id must be nonzero",
                self.name
            )));
        }
        if self.endpoint.host.is_empty() {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: endpoint host must not be empty",
                self.name
            )));
        }
        if self.credential.is_empty() {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: credential must not be empty",
                self.name
            )));
        }
        if url::Url::parse(&self.url()).is_err() {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: endpoint template does not render a valid URL",
                self.name
            )));
        }
        self.rate_limit.validate().map_err(|e| match e {
            RpcError::InvalidConfig(msg) => {
                RpcError::InvalidConfig(format!("provider {}: {msg}", self.name))
            }
            other => other,
        })?;
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: circuit breaker threshold must be nonzero",
                self.name
            )));
        }
        if self.cache.max_entries == 0 || self.cache.ttl_ms == 0 {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: cache size and TTL must be nonzero",
                self.name
            )));
        }
        if self.pool.max_connections == 0 {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: pool size must be nonzero",
                self.name
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(RpcError::InvalidConfig(format!(
                "provider {}: request timeout must be nonzero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Failover controller tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Consecutive failures on the active provider before switching.
    #[serde(default = "default_failover_threshold")]
    pub failover_threshold: u32,
}

fn default_failover_threshold() -> u32 {
    3
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self { failover_threshold: default_failover_threshold() }
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_health_interval_seconds() -> u64 {
    60
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval_seconds: default_health_interval_seconds() }
    }
}

impl HealthConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Top-level client configuration: ordered providers (primary first) plus
/// failover, health, and shutdown tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub providers: Vec<ProviderProfile>,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Grace period for in-flight calls to drain during shutdown.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl ClientConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] when no providers are configured,
    /// provider names collide, chain ids disagree, or any profile is invalid.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.providers.is_empty() {
            return Err(RpcError::InvalidConfig("at least one provider is required".into()));
        }
        let chain_id = self.providers[0].chain_id;
        let mut seen = std::collections::HashSet::new();
        for profile in &self.providers {
            profile.validate()?;
            if profile.chain_id != chain_id {
                return Err(RpcError::InvalidConfig(format!(
                    "provider {} targets chain {} but the client targets chain {chain_id}",
                    profile.name, profile.chain_id
                )));
            }
            if !seen.insert(profile.name.clone()) {
                return Err(RpcError::InvalidConfig(format!(
                    "duplicate provider name {}",
                    profile.name
                )));
            }
        }
        if self.failover.failover_threshold == 0 {
            return Err(RpcError::InvalidConfig("failover threshold must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_profile(name: &str) -> ProviderProfile {
        ProviderProfile {
            name: Arc::from(name),
            chain_id: 1,
            endpoint: EndpointTemplate {
                archive_suffix: Some("-archive".to_string()),
                ..EndpointTemplate::new("rpc.example.com", "eth")
            },
            credential: Credential::new("test-key"),
            archive_mode: false,
            rate_limit: RateLimitConfig::SlidingWindow {
                requests_per_second: 10,
                burst_limit: 50,
                daily_limit: Some(100_000),
            },
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            request_timeout_ms: 30_000,
            degraded_latency_ms: 2_000,
        }
    }

    #[test]
    fn url_rendering_with_archive_toggle() {
        let profile = test_profile("ankr");
        assert_eq!(profile.url(), "https://rpc.example.com/eth/test-key");

        let archive = ProviderProfile { archive_mode: true, ..profile };
        assert_eq!(archive.url(), "https://rpc.example.com/eth-archive/test-key");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        let debug = format!("{credential:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn with_credential_replaces_only_credential() {
        let profile = test_profile("infura");
        let rotated = profile.with_credential("new-key");
        assert_eq!(rotated.credential.expose(), "new-key");
        assert_eq!(rotated.name, profile.name);
        assert_eq!(rotated.chain_id, profile.chain_id);
    }

    #[test]
    fn validation_rejects_empty_credential() {
        let profile =
            ProviderProfile { credential: Credential::new(""), ..test_profile("ankr") };
        let error = profile.validate().unwrap_err();
        assert!(matches!(error, RpcError::InvalidConfig(_)));
    }

    #[test]
    fn validation_rejects_zero_rate_limits() {
        let profile = ProviderProfile {
            rate_limit: RateLimitConfig::SlidingWindow {
                requests_per_second: 0,
                burst_limit: 10,
                daily_limit: None,
            },
            ..test_profile("ankr")
        };
        assert!(profile.validate().is_err());

        let profile = ProviderProfile {
            rate_limit: RateLimitConfig::TokenBucket { requests_per_minute: 600, burst_size: 0 },
            ..test_profile("ankr")
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn client_config_rejects_mixed_chains() {
        let config = ClientConfig {
            providers: vec![
                test_profile("ankr"),
                ProviderProfile { chain_id: 137, ..test_profile("infura") },
            ],
            failover: FailoverConfig::default(),
            health: HealthConfig::default(),
            shutdown_grace_ms: 1_000,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_config_rejects_duplicate_names() {
        let config = ClientConfig {
            providers: vec![test_profile("ankr"), test_profile("ankr")],
            failover: FailoverConfig::default(),
            health: HealthConfig::default(),
            shutdown_grace_ms: 1_000,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_config_rejects_empty_providers() {
        let config = ClientConfig {
            providers: vec![],
            failover: FailoverConfig::default(),
            health: HealthConfig::default(),
            shutdown_grace_ms: 1_000,
        };
        assert!(matches!(config.validate(), Err(RpcError::InvalidConfig(_))));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let retry = RetryConfig { max_retries: 5, base_delay_ms: 100, max_delay_ms: 1_000 };
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(400));
        assert_eq!(retry.backoff(3), Duration::from_millis(800));
        assert_eq!(retry.backoff(4), Duration::from_millis(1_000));
        assert_eq!(retry.backoff(30), Duration::from_millis(1_000));
    }

    #[test]
    fn rate_limit_config_deserializes_tagged() {
        let raw = r#"{"strategy":"compute_units","units_per_second":700,"default_cost":20}"#;
        let config: RateLimitConfig = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            config,
            RateLimitConfig::ComputeUnits { units_per_second: 700, default_cost: 20, .. }
        ));
    }
}
