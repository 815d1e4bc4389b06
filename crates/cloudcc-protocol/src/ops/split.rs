//! Split operation types.

use serde::{Deserialize, Serialize};

use crate::diagnostics::ToolDiagnostics;

/// Where the source compilation unit comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    /// An artifact already in the store (e.g. pushed via an upload URL).
    Key(String),
    /// Base64-encoded bytes carried in the request itself.
    Inline(String),
}

/// Split request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRequest {
    /// Source unit to split.
    pub source: SourceRef,
    /// Whether the source bytes are zlib-compressed.
    #[serde(default)]
    pub compressed: bool,
    /// Number of partitions to ask the splitter for.
    pub chunks: u32,
    /// Frontend flags; input and output paths are appended by the worker.
    #[serde(default)]
    pub frontend_flags: String,
}

/// Split response payload (the manifest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitResponse {
    /// One key per partition the splitter produced.
    pub keys: Vec<String>,
    /// Frontend run diagnostics.
    pub frontend: ToolDiagnostics,
    /// Splitter run diagnostics.
    pub splitter: ToolDiagnostics,
}
