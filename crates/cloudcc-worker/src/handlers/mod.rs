//! Operation handlers for the worker RPC.
//!
//! Each operation has its own handler module. Handlers validate the payload
//! completely before any store or tool work starts.

pub mod compile;
pub mod probe;
pub mod split;
pub mod upload_url;

use cloudcc_flags::FlagPolicy;
use cloudcc_protocol::RpcError;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::compile::ConsumedArtifact;
use crate::key::ArtifactKey;

/// A handler's result plus any cleanup to run after the response is written.
pub struct Handled<'a> {
    pub result: Result<serde_json::Value, RpcError>,
    pub cleanup: Option<ConsumedArtifact<'a>>,
}

impl Handled<'_> {
    /// A failure with nothing to clean up.
    pub fn failed(error: RpcError) -> Self {
        Self {
            result: Err(error),
            cleanup: None,
        }
    }
}

impl From<Result<serde_json::Value, RpcError>> for Handled<'_> {
    fn from(result: Result<serde_json::Value, RpcError>) -> Self {
        Self { result, cleanup: None }
    }
}

fn parse_payload<T: DeserializeOwned>(op: &str, payload: &serde_json::Value) -> Result<T, RpcError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| RpcError::invalid_request(format!("invalid {} request: {}", op, e)))
}

fn to_payload<T: Serialize>(response: &T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(response)
        .map_err(|e| RpcError::staging(format!("failed to serialize response: {}", e)))
}

fn parse_key(field: &str, raw: &str) -> Result<ArtifactKey, RpcError> {
    ArtifactKey::parse(raw).map_err(|e| {
        RpcError::with_data(
            cloudcc_protocol::ErrorCode::InvalidRequest,
            e.to_string(),
            serde_json::json!({ "field": field }),
        )
    })
}

/// Run the argument guard over a caller flag string.
fn check_flags(field: &str, flags: &str, policy: &FlagPolicy) -> Result<Vec<String>, RpcError> {
    cloudcc_flags::check(flags, policy).into_argv().map_err(|check| {
        tracing::info!(
            field,
            rejected = ?check.rejected_tokens,
            reasons = ?check.rejection_reason_codes(),
            "flags rejected"
        );
        RpcError::flags_rejected(field, &check.rejected_tokens, &check.rejection_reason_codes())
    })
}
