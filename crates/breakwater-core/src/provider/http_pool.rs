//! Bounded HTTP connection pool with guaranteed-release semantics.

use crate::{config::PoolConfig, provider::errors::RpcError};
use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A raw HTTP exchange: status, headers (for rate-limit telemetry), body.
///
/// The pool deliberately does not classify non-success statuses; the error
/// mapping table in [`crate::provider::errors`] owns that decision.
#[derive(Debug)]
pub struct HttpExchange {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// RAII guard ensuring the concurrency permit is released even when the
/// request errors or the calling future is dropped mid-flight.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
}

/// Connection pool for one provider.
///
/// Reuses keep-alive sockets via the underlying `reqwest` client and bounds
/// concurrent outbound requests with a semaphore. Requests beyond the limit
/// queue for a bounded wait; when the wait expires the call surfaces
/// [`RpcError::ConcurrentLimitExceeded`] instead of blocking indefinitely.
pub struct HttpPool {
    client: Client,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    max_connections: usize,
}

impl HttpPool {
    /// Builds the pool and its keep-alive HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidConfig`] if the underlying client fails to
    /// build (TLS backend unavailable, invalid defaults).
    pub fn new(config: &PoolConfig, request_timeout: Duration) -> Result<Self, RpcError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.max_connections)
            .connect_timeout(Duration::from_secs(5))
            .timeout(request_timeout.saturating_add(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("breakwater/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                RpcError::InvalidConfig(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_connections)),
            acquire_timeout: config.acquire_timeout(),
            max_connections: config.max_connections,
        })
    }

    /// Sends one JSON-RPC POST under the pool's concurrency cap.
    ///
    /// # Errors
    ///
    /// - [`RpcError::ConcurrentLimitExceeded`] when no pool slot frees up
    ///   within the bounded wait
    /// - [`RpcError::Timeout`] when the request exceeds `timeout`
    /// - [`RpcError::Network`] for transport failures (sanitized)
    pub async fn execute(
        &self,
        url: &str,
        body: Bytes,
        timeout: Duration,
    ) -> Result<HttpExchange, RpcError> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                available_permits = self.permits.available_permits(),
                "pool slot wait expired"
            );
            RpcError::ConcurrentLimitExceeded
        })?
        .map_err(|_| RpcError::ConcurrentLimitExceeded)?;

        let _guard = PermitGuard { _permit: permit };

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RpcError::from_transport(&e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| RpcError::from_transport(&e))?;

        Ok(HttpExchange { status, headers, body })
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
