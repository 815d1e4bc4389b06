//! Probe operation types.

use serde::{Deserialize, Serialize};

/// Probe request payload (always empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeRequest {}

/// Probe response payload describing what this worker accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// Worker version.
    pub worker_version: String,
    /// Minimum protocol version supported.
    pub protocol_min: i32,
    /// Maximum protocol version supported.
    pub protocol_max: i32,
    /// Operations this worker serves.
    pub features: Vec<String>,
    /// Artifact store namespace the worker reads and writes.
    pub namespace: String,
    /// Largest `chunks` value a split request may ask for.
    pub max_chunks: u32,
    /// Largest inline source payload, in decoded bytes.
    pub max_inline_bytes: u64,
}
