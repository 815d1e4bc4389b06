//! Compile operation handler.
//!
//! Returns the object bytes base64-encoded. The consumed partition is handed
//! back as cleanup so it is deleted only after the response has been written.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cloudcc_protocol::{
    ops::{CompileRequest, CompileResponse},
    RpcError, RpcRequest,
};

use super::{check_flags, parse_key, parse_payload, to_payload, Handled};
use crate::compile::{CompileInput, CompileStage};
use crate::context::WorkerContext;

/// Handle the compile operation.
pub fn handle<'a>(request: &RpcRequest, ctx: &'a WorkerContext) -> Handled<'a> {
    let input = match validate(request, ctx) {
        Ok(input) => input,
        Err(e) => return Handled::failed(e),
    };

    let stage = CompileStage {
        store: ctx.store.as_ref(),
        staging: &ctx.staging,
        backend: ctx.tools.backend.as_ref(),
    };
    let attempt = stage.run(&input);

    let result = attempt.result.map_err(RpcError::from).and_then(|output| {
        to_payload(&CompileResponse {
            object_base64: BASE64.encode(&output.object),
            object_size: output.object.len() as u64,
            diagnostics: output.backend.diagnostics(ctx.tools.backend.name()),
        })
    });
    Handled {
        result,
        cleanup: attempt.consumed,
    }
}

fn validate(request: &RpcRequest, ctx: &WorkerContext) -> Result<CompileInput, RpcError> {
    let req: CompileRequest = parse_payload("compile", &request.payload)?;
    let key = parse_key("key", &req.key)?;
    let backend_args = check_flags("backend_flags", &req.backend_flags, &ctx.config.flags)?;
    Ok(CompileInput { key, backend_args })
}
