//! Error types for the RPC protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diagnostics::ToolDiagnostics;

/// Error codes returned in RPC error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// A caller-supplied flag string was rejected by the argument guard.
    FlagsRejected,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown operation requested.
    UnknownOperation,
    /// Inline payload exceeds the maximum allowed size.
    PayloadTooLarge,
    /// Fetching an artifact from the store failed.
    ReadError,
    /// Uploading an artifact to the store failed.
    WriteError,
    /// An external tool could not be started.
    StageInvocationError,
    /// An external tool ran and reported failure.
    ToolReportedFailure,
    /// Local staging (filesystem or decompression) failed.
    StagingError,
}

/// Broad class of an error, used to pick a transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller sent something we will never accept.
    Client,
    /// The store or a tool failed downstream of validation.
    Downstream,
    /// The worker itself could not do its job.
    Internal,
}

impl ErrorCode {
    /// The error class this code belongs to.
    pub fn class(self) -> ErrorClass {
        match self {
            Self::InvalidRequest
            | Self::FlagsRejected
            | Self::UnsupportedProtocol
            | Self::UnknownOperation
            | Self::PayloadTooLarge => ErrorClass::Client,
            Self::ReadError | Self::WriteError | Self::ToolReportedFailure => {
                ErrorClass::Downstream
            }
            Self::StageInvocationError | Self::StagingError => ErrorClass::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::FlagsRejected => write!(f, "FLAGS_REJECTED"),
            Self::UnsupportedProtocol => write!(f, "UNSUPPORTED_PROTOCOL"),
            Self::UnknownOperation => write!(f, "UNKNOWN_OPERATION"),
            Self::PayloadTooLarge => write!(f, "PAYLOAD_TOO_LARGE"),
            Self::ReadError => write!(f, "READ_ERROR"),
            Self::WriteError => write!(f, "WRITE_ERROR"),
            Self::StageInvocationError => write!(f, "STAGE_INVOCATION_ERROR"),
            Self::ToolReportedFailure => write!(f, "TOOL_REPORTED_FAILURE"),
            Self::StagingError => write!(f, "STAGING_ERROR"),
        }
    }
}

/// Why a store read failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadErrorKind {
    /// The key does not exist in the store.
    NotFound,
    /// The backing service errored; a later attempt may succeed.
    Transient,
}

/// RPC error response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details (failing field, stage, counts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Raw diagnostics of every tool that ran before the failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<ToolDiagnostics>,
}

impl RpcError {
    /// Create a new RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            diagnostics: Vec::new(),
        }
    }

    /// Create a new RPC error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
            diagnostics: Vec::new(),
        }
    }

    /// Attach tool diagnostics to this error.
    pub fn with_diagnostics(mut self, diagnostics: Vec<ToolDiagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create a FLAGS_REJECTED error listing the offending tokens.
    pub fn flags_rejected(field: &str, rejected: &[String], reasons: &[String]) -> Self {
        Self::with_data(
            ErrorCode::FlagsRejected,
            format!("{} rejected: {}", field, reasons.join(", ")),
            serde_json::json!({
                "field": field,
                "rejected_tokens": rejected,
                "reasons": reasons,
            }),
        )
    }

    /// Create an UNSUPPORTED_PROTOCOL error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    /// Create an UNKNOWN_OPERATION error.
    pub fn unknown_operation(op: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownOperation,
            format!("unknown operation: {}", op),
            serde_json::json!({ "op": op }),
        )
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(size: u64, max: u64) -> Self {
        Self::with_data(
            ErrorCode::PayloadTooLarge,
            format!("payload size {} exceeds maximum {}", size, max),
            serde_json::json!({ "size": size, "max_bytes": max }),
        )
    }

    /// Create a READ_ERROR for `key`.
    pub fn read_error(key: &str, kind: ReadErrorKind, message: impl Into<String>) -> Self {
        Self::with_data(
            ErrorCode::ReadError,
            message,
            serde_json::json!({ "key": key, "kind": kind }),
        )
    }

    /// Create a WRITE_ERROR after `failed` of `total` uploads failed.
    pub fn write_error(failed: usize, total: usize, message: impl Into<String>) -> Self {
        Self::with_data(
            ErrorCode::WriteError,
            message,
            serde_json::json!({ "failed": failed, "total": total }),
        )
    }

    /// Create a STAGE_INVOCATION_ERROR for a tool that could not start.
    pub fn stage_invocation(stage: &str, tool: &str, message: impl Into<String>) -> Self {
        Self::with_data(
            ErrorCode::StageInvocationError,
            message,
            serde_json::json!({ "stage": stage, "tool": tool }),
        )
    }

    /// Create a TOOL_REPORTED_FAILURE carrying the tool diagnostics.
    pub fn tool_failure(stage: &str, message: impl Into<String>, diagnostics: Vec<ToolDiagnostics>) -> Self {
        Self::with_data(
            ErrorCode::ToolReportedFailure,
            message,
            serde_json::json!({ "stage": stage }),
        )
        .with_diagnostics(diagnostics)
    }

    /// Create a STAGING_ERROR.
    pub fn staging(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StagingError, message)
    }

    /// The read failure kind, when this is a READ_ERROR.
    pub fn read_kind(&self) -> Option<ReadErrorKind> {
        if self.code != ErrorCode::ReadError {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|d| d.get("kind"))
            .and_then(|k| serde_json::from_value(k.clone()).ok())
    }

    /// HTTP status an HTTP front end should answer with.
    pub fn http_status(&self) -> u16 {
        match self.code {
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::ReadError => match self.read_kind() {
                Some(ReadErrorKind::NotFound) => 404,
                _ => 502,
            },
            ErrorCode::WriteError => 502,
            ErrorCode::ToolReportedFailure => 422,
            code => match code.class() {
                ErrorClass::Client => 400,
                ErrorClass::Downstream => 502,
                ErrorClass::Internal => 500,
            },
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
