//! Split operation handler.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cloudcc_protocol::{
    ops::{SourceRef, SplitRequest, SplitResponse},
    RpcError, RpcRequest,
};

use super::{check_flags, parse_key, parse_payload, to_payload};
use crate::context::WorkerContext;
use crate::split::{SplitInput, SplitSource, SplitStage};

/// Handle the split operation.
pub fn handle(request: &RpcRequest, ctx: &WorkerContext) -> Result<serde_json::Value, RpcError> {
    let req: SplitRequest = parse_payload("split", &request.payload)?;
    let input = validate(req, ctx)?;

    let stage = SplitStage {
        store: ctx.store.as_ref(),
        staging: &ctx.staging,
        frontend: ctx.tools.frontend.as_ref(),
        splitter: ctx.tools.splitter.as_ref(),
    };
    let manifest = stage.run(&input)?;

    let response = SplitResponse {
        keys: manifest.keys.iter().map(|k| k.to_string()).collect(),
        frontend: manifest.frontend.diagnostics(ctx.tools.frontend.name()),
        splitter: manifest.splitter.diagnostics(ctx.tools.splitter.name()),
    };
    to_payload(&response)
}

fn validate(req: SplitRequest, ctx: &WorkerContext) -> Result<SplitInput, RpcError> {
    let config = &ctx.config;
    if req.chunks == 0 || req.chunks > config.max_chunks {
        return Err(RpcError::with_data(
            cloudcc_protocol::ErrorCode::InvalidRequest,
            format!("chunks must be in 1..={}, got {}", config.max_chunks, req.chunks),
            serde_json::json!({ "field": "chunks", "max": config.max_chunks }),
        ));
    }

    let source = match req.source {
        SourceRef::Key(raw) => SplitSource::Key(parse_key("source.key", &raw)?),
        SourceRef::Inline(encoded) => {
            // base64 expands 3 bytes to 4 chars
            let decoded_len = (encoded.len() as u64 / 4) * 3;
            if decoded_len > config.max_inline_bytes {
                return Err(RpcError::payload_too_large(decoded_len, config.max_inline_bytes));
            }
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| RpcError::invalid_request(format!("source.inline is not valid base64: {}", e)))?;
            if bytes.len() as u64 > config.max_inline_bytes {
                return Err(RpcError::payload_too_large(bytes.len() as u64, config.max_inline_bytes));
            }
            SplitSource::Inline(bytes)
        }
    };

    let frontend_args = check_flags("frontend_flags", &req.frontend_flags, &config.flags)?;
    Ok(SplitInput {
        source,
        compressed: req.compressed,
        chunks: req.chunks,
        frontend_args,
    })
}
