//! Error taxonomy for the resilient RPC transport.
//!
//! Every failure — HTTP status, timeout, DNS failure, malformed JSON-RPC
//! response, or a provider-returned RPC error object — maps into one fixed
//! [`RpcError`] kind annotated with retryability and a suggested backoff.
//! Classification is table-driven on structured fields (HTTP status, JSON-RPC
//! error code); free text is consulted only for a small fixed set of known
//! substrings and never beyond them.

use std::{sync::Arc, time::Duration};
use thiserror::Error;

/// Fixed substrings consulted when an HTTP 403 needs disambiguation between
/// plain authorization failure and exhausted billing quota.
const QUOTA_PHRASES: &[&str] = &["quota", "daily limit", "capacity"];

/// Fixed substrings that mark an HTTP 400 as requiring an archive node.
const ARCHIVE_PHRASES: &[&str] = &["archive", "pruned", "missing trie node"];

/// Default backoff suggested when a provider rate-limits without telling us
/// when a slot frees up.
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

/// A single provider's failure inside an exhausted failover sweep.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: Arc<str>,
    pub error: RpcError,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Errors surfaced by the RPC transport.
///
/// Each kind carries a fixed retryability and failover classification; see
/// [`RpcError::retryable`] and [`RpcError::triggers_failover`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// Client configuration is invalid. Fatal: raised at construction and
    /// prevents a client instance from existing at all.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credentials were rejected during validation (rotation or startup probe).
    #[error("invalid credentials for provider {provider}")]
    InvalidCredentials { provider: Arc<str> },

    /// Provider rejected the request outright (HTTP 401/403).
    #[error("unauthorized by provider")]
    Unauthorized,

    /// Local limiter denial or provider-side HTTP 429 / code -32005.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The provider's billing quota is exhausted. Retrying the same provider
    /// is pointless; the failover controller switches instead.
    #[error("provider quota exceeded")]
    QuotaExceeded,

    /// The connection pool's concurrency cap was hit and the bounded queue
    /// wait expired.
    #[error("concurrent request limit exceeded")]
    ConcurrentLimitExceeded,

    /// Provider-side failure (HTTP 5xx) or an open circuit breaker.
    #[error("provider unavailable{}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ServiceUnavailable { status: Option<u16> },

    /// The request or a pool/backoff wait exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Transport-level failure: DNS, connection refused, body read errors,
    /// malformed JSON-RPC responses. Also the fallback classification.
    #[error("network error: {0}")]
    Network(String),

    /// The request needs an archive node but the endpoint is a pruned one.
    /// A configuration problem, never retried.
    #[error("archive node required for this request")]
    ArchiveRequired,

    /// Application-level JSON-RPC error passed through from the provider
    /// (reverts, invalid params, unknown methods). Not the transport's fault;
    /// neither retried nor failed over.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// Internal cache failure. Never propagated to callers: the executor logs
    /// it and degrades to a cache miss.
    #[error("cache error: {0}")]
    Cache(String),

    /// Every configured provider failed within one logical call.
    #[error("all providers exhausted: [{}]", .attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    FailoverExhausted { attempts: Vec<ProviderFailure> },
}

impl RpcError {
    /// Returns `true` if retrying the same provider may succeed.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } |
                Self::ConcurrentLimitExceeded |
                Self::ServiceUnavailable { .. } |
                Self::Timeout |
                Self::Network(_)
        )
    }

    /// Returns `true` if this error should make the failover controller
    /// switch to the next provider immediately.
    #[must_use]
    pub fn triggers_failover(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::QuotaExceeded | Self::ServiceUnavailable { .. }
        )
    }

    /// Returns `true` if this error represents a provider-side fault that
    /// should count toward opening the circuit breaker.
    ///
    /// Rate limits and authorization failures are expected provider behavior,
    /// not outages, and do not trip the circuit.
    #[must_use]
    pub fn counts_toward_circuit(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. } | Self::Timeout | Self::Network(_))
    }

    /// Suggested delay before the next attempt, when the error implies one.
    #[must_use]
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            Self::ConcurrentLimitExceeded => Some(Duration::from_millis(100)),
            _ => None,
        }
    }

    /// Short static label for metrics and log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ConcurrentLimitExceeded => "concurrent_limit_exceeded",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Timeout => "timeout",
            Self::Network(_) => "network_error",
            Self::ArchiveRequired => "archive_required",
            Self::Rpc { .. } => "rpc_error",
            Self::Cache(_) => "cache_error",
            Self::FailoverExhausted { .. } => "failover_exhausted",
        }
    }

    /// Classifies a non-success HTTP response.
    ///
    /// The mapping is a fixed table on the status code, with two documented
    /// substring disambiguations (403 quota phrasing, 400 archive phrasing):
    ///
    /// | Status | Kind |
    /// |--------|------|
    /// | 401 | `Unauthorized` |
    /// | 403 + quota phrase | `QuotaExceeded` |
    /// | 403 otherwise | `Unauthorized` |
    /// | 429 | `RateLimited` |
    /// | 400 + archive phrase | `ArchiveRequired` |
    /// | 5xx | `ServiceUnavailable` |
    /// | anything else | `Network` fallback |
    #[must_use]
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let body_lower = body.to_lowercase();
        match status {
            401 => Self::Unauthorized,
            403 => {
                if QUOTA_PHRASES.iter().any(|p| body_lower.contains(p)) {
                    Self::QuotaExceeded
                } else {
                    Self::Unauthorized
                }
            }
            429 => Self::RateLimited { retry_after: DEFAULT_RATE_LIMIT_DELAY },
            400 => {
                if ARCHIVE_PHRASES.iter().any(|p| body_lower.contains(p)) {
                    Self::ArchiveRequired
                } else {
                    Self::Network(format!("HTTP 400: {}", truncate(&body_lower, 128)))
                }
            }
            500..=599 => Self::ServiceUnavailable { status: Some(status) },
            _ => Self::Network(format!("HTTP {status}")),
        }
    }

    /// Classifies a transport error from the HTTP client.
    ///
    /// The underlying error text is sanitized to a coarse category so endpoint
    /// URLs and credentials never leak into logs or caller-visible messages.
    #[must_use]
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        let detail = if error.is_connect() {
            "connection refused or unreachable"
        } else if error.is_request() {
            "request failed"
        } else if error.is_body() || error.is_decode() {
            "response body error"
        } else if error.is_redirect() {
            "too many redirects"
        } else {
            "transport failure"
        };
        Self::Network(detail.to_string())
    }

    /// Classifies a JSON-RPC error object returned by the provider.
    ///
    /// RPC-level errors flow through the same taxonomy as transport errors:
    /// `-32005` is the conventional rate-limit code, `-32603` and the server
    /// range `-32099..=-32000` indicate provider faults (unless the message
    /// carries an archive phrase), and everything else is an application error
    /// passed through untouched.
    #[must_use]
    pub fn from_rpc_object(code: i32, message: &str) -> Self {
        let message_lower = message.to_lowercase();
        match code {
            -32005 => Self::RateLimited { retry_after: DEFAULT_RATE_LIMIT_DELAY },
            -32603 => Self::ServiceUnavailable { status: None },
            -32099..=-32000 => {
                if ARCHIVE_PHRASES.iter().any(|p| message_lower.contains(p)) {
                    Self::ArchiveRequired
                } else if QUOTA_PHRASES.iter().any(|p| message_lower.contains(p)) {
                    Self::QuotaExceeded
                } else {
                    Self::Rpc { code, message: message.to_string() }
                }
            }
            _ => Self::Rpc { code, message: message.to_string() },
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_table() {
        assert!(matches!(RpcError::from_http_status(401, ""), RpcError::Unauthorized));
        assert!(matches!(RpcError::from_http_status(403, "bad key"), RpcError::Unauthorized));
        assert!(matches!(
            RpcError::from_http_status(403, "daily quota exceeded"),
            RpcError::QuotaExceeded
        ));
        assert!(matches!(
            RpcError::from_http_status(429, "slow down"),
            RpcError::RateLimited { .. }
        ));
        assert!(matches!(
            RpcError::from_http_status(400, "requested block requires archive node"),
            RpcError::ArchiveRequired
        ));
        assert!(matches!(RpcError::from_http_status(400, "bad request"), RpcError::Network(_)));
        assert!(matches!(
            RpcError::from_http_status(500, ""),
            RpcError::ServiceUnavailable { status: Some(500) }
        ));
        assert!(matches!(
            RpcError::from_http_status(503, ""),
            RpcError::ServiceUnavailable { status: Some(503) }
        ));
        assert!(matches!(RpcError::from_http_status(302, ""), RpcError::Network(_)));
    }

    #[test]
    fn rpc_object_table() {
        assert!(matches!(
            RpcError::from_rpc_object(-32005, "limit exceeded"),
            RpcError::RateLimited { .. }
        ));
        assert!(matches!(
            RpcError::from_rpc_object(-32603, "internal error"),
            RpcError::ServiceUnavailable { status: None }
        ));
        assert!(matches!(
            RpcError::from_rpc_object(-32000, "missing trie node abc"),
            RpcError::ArchiveRequired
        ));
        assert!(matches!(
            RpcError::from_rpc_object(-32000, "capacity exceeded"),
            RpcError::QuotaExceeded
        ));
        assert!(matches!(
            RpcError::from_rpc_object(-32000, "execution reverted"),
            RpcError::Rpc { code: -32000, .. }
        ));
        assert!(matches!(
            RpcError::from_rpc_object(-32601, "method not found"),
            RpcError::Rpc { code: -32601, .. }
        ));
    }

    #[test]
    fn retryability_flags() {
        assert!(RpcError::RateLimited { retry_after: Duration::from_secs(1) }.retryable());
        assert!(RpcError::ConcurrentLimitExceeded.retryable());
        assert!(RpcError::ServiceUnavailable { status: Some(502) }.retryable());
        assert!(RpcError::Timeout.retryable());
        assert!(RpcError::Network("x".into()).retryable());

        assert!(!RpcError::QuotaExceeded.retryable());
        assert!(!RpcError::ArchiveRequired.retryable());
        assert!(!RpcError::Unauthorized.retryable());
        assert!(!RpcError::InvalidConfig("x".into()).retryable());
        assert!(!RpcError::Rpc { code: -32000, message: "revert".into() }.retryable());
    }

    #[test]
    fn failover_classification() {
        assert!(RpcError::RateLimited { retry_after: Duration::ZERO }.triggers_failover());
        assert!(RpcError::QuotaExceeded.triggers_failover());
        assert!(RpcError::ServiceUnavailable { status: None }.triggers_failover());

        assert!(!RpcError::Timeout.triggers_failover());
        assert!(!RpcError::ArchiveRequired.triggers_failover());
        assert!(!RpcError::Rpc { code: -32601, message: String::new() }.triggers_failover());
    }

    #[test]
    fn circuit_classification_excludes_rate_limits() {
        assert!(RpcError::ServiceUnavailable { status: Some(500) }.counts_toward_circuit());
        assert!(RpcError::Timeout.counts_toward_circuit());
        assert!(RpcError::Network("dns".into()).counts_toward_circuit());

        assert!(!RpcError::RateLimited { retry_after: Duration::ZERO }.counts_toward_circuit());
        assert!(!RpcError::QuotaExceeded.counts_toward_circuit());
        assert!(!RpcError::Unauthorized.counts_toward_circuit());
    }

    #[test]
    fn exhausted_error_lists_every_provider() {
        let error = RpcError::FailoverExhausted {
            attempts: vec![
                ProviderFailure {
                    provider: Arc::from("ankr"),
                    error: RpcError::RateLimited { retry_after: Duration::from_secs(1) },
                },
                ProviderFailure {
                    provider: Arc::from("infura"),
                    error: RpcError::ServiceUnavailable { status: Some(502) },
                },
            ],
        };
        let text = error.to_string();
        assert!(text.contains("ankr"));
        assert!(text.contains("infura"));
        assert!(text.contains("rate limited"));
    }
}
