//! Probe operation handler.
//!
//! The probe operation MUST work with protocol_version: 0.

use cloudcc_protocol::{ops::ProbeResponse, RpcError, WORKER_VERSION};

use super::to_payload;
use crate::context::WorkerContext;

/// Handle the probe operation.
pub fn handle(ctx: &WorkerContext) -> Result<serde_json::Value, RpcError> {
    let config = &ctx.config;
    let response = ProbeResponse {
        worker_version: WORKER_VERSION.to_string(),
        protocol_min: config.protocol_min,
        protocol_max: config.protocol_max,
        features: config.features(),
        namespace: ctx.store.namespace().to_string(),
        max_chunks: config.max_chunks,
        max_inline_bytes: config.max_inline_bytes,
    };
    to_payload(&response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_context;

    #[test]
    fn test_probe_reports_limits() {
        let (ctx, _store, _temp) = memory_context();
        let payload = handle(&ctx).unwrap();
        let response: ProbeResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(response.protocol_min, 1);
        assert_eq!(response.max_chunks, ctx.config.max_chunks);
        assert_eq!(response.namespace, "test");
        assert!(response.features.contains(&"split".to_string()));
    }
}
