//! Compile operation types.

use serde::{Deserialize, Serialize};

use crate::diagnostics::ToolDiagnostics;

/// Compile request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Partition artifact key from a split manifest.
    pub key: String,
    /// Backend flags; input and output paths are appended by the worker.
    #[serde(default)]
    pub backend_flags: String,
}

/// Compile response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResponse {
    /// Object file bytes, base64-encoded.
    pub object_base64: String,
    /// Decoded object size in bytes.
    pub object_size: u64,
    /// Backend run diagnostics.
    pub diagnostics: ToolDiagnostics,
}
