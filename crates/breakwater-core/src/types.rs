//! Core type definitions for the JSON-RPC wire format and per-call state.
//!
//! # Type Categories
//!
//! ## JSON-RPC Protocol Types
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: protocol conformance
//!
//! ## Per-Call Types
//! - [`RequestContext`]: ephemeral bookkeeping created per call and discarded
//!   after completion; never shared across calls
//!
//! # Performance Notes
//!
//! - `jsonrpc`: uses `Cow<'static, str>` to avoid allocation when constructing
//!   with the static version string "2.0".
//! - `id`: uses `Arc<serde_json::Value>` so the request id can be cheaply
//!   compared against the response id for correlation without deep-copying.

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc, time::Instant};

/// JSON-RPC protocol version constant to avoid repeated allocations.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for JSON-RPC version - zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// JSON-RPC 2.0 request structure.
///
/// Represents an outgoing RPC request conforming to the JSON-RPC 2.0
/// specification. The `id` must be echoed by the provider in the response;
/// [`crate::provider::RpcExecutor`] verifies the correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Creates a new JSON-RPC request with zero allocation for the version string.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }
}

/// JSON-RPC 2.0 response structure.
///
/// A response contains either a `result` (success) or an `error` (failure),
/// but never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Creates a successful JSON-RPC response.
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    /// Creates an error JSON-RPC response.
    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
///
/// Standard error codes follow the JSON-RPC 2.0 convention:
///
/// - `-32700`: Parse error (invalid JSON)
/// - `-32600`: Invalid request (malformed JSON-RPC)
/// - `-32601`: Method not found
/// - `-32602`: Invalid params
/// - `-32603`: Internal error
/// - `-32000` to `-32099`: Server-defined errors
/// - `-32005`: Limit exceeded (rate limiting, by convention)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Ephemeral per-call bookkeeping.
///
/// Created at the top of [`crate::provider::RpcExecutor::call`], threaded
/// through the attempt loop, and discarded when the call completes. Holds no
/// shared state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Sequence number used as the JSON-RPC request id.
    pub request_id: u64,
    /// Correlation id threaded through log events for this call.
    pub correlation_id: uuid::Uuid,
    pub method: String,
    /// Whether the method is on the provider's cacheable allow-list.
    pub cacheable: bool,
    /// Compute-unit cost of the method under the active rate-limit strategy
    /// (1 for strategies that meter raw request counts).
    pub compute_units: u64,
    pub started_at: Instant,
    /// Zero-based retry attempt counter.
    pub attempt: u32,
    /// Absolute deadline derived from the caller-supplied budget, if any.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: u64, method: &str, cacheable: bool, compute_units: u64) -> Self {
        Self {
            request_id,
            correlation_id: uuid::Uuid::new_v4(),
            method: method.to_string(),
            cacheable,
            compute_units,
            started_at: Instant::now(),
            attempt: 0,
            deadline: None,
        }
    }

    /// Remaining time before the deadline, or `None` when no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` when a deadline was set and has already passed.
    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_without_null_params() {
        let request = JsonRpcRequest::new("eth_blockNumber", None, json!(1));
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(!encoded.contains("params"));
        assert!(encoded.contains(r#""jsonrpc":"2.0""#));
        assert!(encoded.contains(r#""id":1"#));
    }

    #[test]
    fn response_roundtrip_preserves_id() {
        let raw = r#"{"jsonrpc":"2.0","result":"0x10","id":42}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(*response.id, json!(42));
        assert_eq!(response.result, Some(json!("0x10")));
        assert!(response.error.is_none());
    }

    #[test]
    fn error_response_parses() {
        let raw = r#"{"jsonrpc":"2.0","error":{"code":-32005,"message":"limit exceeded"},"id":"abc"}"#;
        let response: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32005);
        assert_eq!(error.message, "limit exceeded");
    }

    #[test]
    fn context_deadline_tracking() {
        let mut ctx = RequestContext::new(1, "eth_chainId", false, 1);
        assert!(ctx.remaining().is_none());
        assert!(!ctx.deadline_exceeded());

        ctx.deadline = Some(Instant::now() - std::time::Duration::from_millis(1));
        assert!(ctx.deadline_exceeded());
    }
}
