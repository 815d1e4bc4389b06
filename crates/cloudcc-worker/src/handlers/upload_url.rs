//! Upload-URL operation handler.
//!
//! Issues a fresh key and a time-limited URL the client can PUT the source
//! unit to, for sources too large to send inline.

use std::time::Duration;

use cloudcc_protocol::{
    ops::{UploadUrlRequest, UploadUrlResponse},
    RpcError, RpcRequest,
};

use super::{parse_payload, to_payload};
use crate::context::WorkerContext;
use crate::key::ArtifactKey;

/// Handle the upload_url operation.
pub fn handle(request: &RpcRequest, ctx: &WorkerContext) -> Result<serde_json::Value, RpcError> {
    let req: UploadUrlRequest = parse_payload("upload_url", &request.payload)?;
    let store_config = &ctx.config.store;

    let ttl_secs = req.expires_in_seconds.unwrap_or(store_config.default_upload_ttl_secs);
    if ttl_secs == 0 || ttl_secs > store_config.max_upload_ttl_secs {
        return Err(RpcError::with_data(
            cloudcc_protocol::ErrorCode::InvalidRequest,
            format!(
                "expires_in_seconds must be in 1..={}, got {}",
                store_config.max_upload_ttl_secs, ttl_secs
            ),
            serde_json::json!({ "field": "expires_in_seconds" }),
        ));
    }

    let key = ArtifactKey::generate();
    let signed = ctx
        .store
        .signed_upload_url(&key, Duration::from_secs(ttl_secs))
        .map_err(|e| RpcError::staging(e.to_string()))?;

    tracing::info!(key = %key, ttl_secs, "issued upload URL");
    to_payload(&UploadUrlResponse {
        key: signed.key.to_string(),
        url: signed.url,
        expires_at: signed.expires_at,
    })
}
