//! RPC request types.

use serde::{Deserialize, Serialize};

/// RPC request envelope.
///
/// Every worker operation accepts a single JSON request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version (selected by the client after probe).
    /// For probe requests, this MUST be 0.
    pub protocol_version: i32,
    /// Operation name.
    pub op: String,
    /// Caller-chosen request ID for correlation.
    pub request_id: String,
    /// Operation-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RpcRequest {
    /// Build a request for `op` with a serializable payload.
    pub fn new(
        protocol_version: i32,
        op: impl Into<String>,
        request_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            protocol_version,
            op: op.into(),
            request_id: request_id.into(),
            payload,
        }
    }
}
