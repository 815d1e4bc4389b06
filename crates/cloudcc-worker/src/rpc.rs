//! Worker RPC Handler
//!
//! Implements the stdin/stdout JSON RPC handler for the worker entrypoint:
//!
//!   cloudcc-worker rpc     one request in, one response out
//!   cloudcc-worker serve   newline-delimited requests, handled by a fixed pool
//!
//! Responses are written before any deferred cleanup runs, so a compile
//! response is on the wire before its input artifact is deleted.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;

use cloudcc_protocol::{ops::names, RpcError, RpcRequest, RpcResponse, PROTOCOL_VERSION_PROBE};

use crate::context::WorkerContext;
use crate::handlers::{self, Handled};
use crate::logging::request_span;

/// Main RPC handler for the worker.
pub struct RpcHandler {
    ctx: WorkerContext,
}

impl RpcHandler {
    /// Create a new RPC handler over the given context.
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Run the RPC handler, reading from stdin and writing to stdout.
    pub fn run(&self) -> io::Result<()> {
        self.run_with_io(&mut io::stdin().lock(), &mut io::stdout().lock())
    }

    /// Handle a single request with custom I/O (for testing).
    pub fn run_with_io<R: BufRead, W: Write>(&self, reader: &mut R, writer: &mut W) -> io::Result<()> {
        let mut line = String::new();
        if let Err(e) = reader.read_line(&mut line) {
            let error = RpcError::invalid_request(format!("failed to read request: {}", e));
            let response = RpcResponse::error(PROTOCOL_VERSION_PROBE, String::new(), error);
            return write_response(writer, &response);
        }
        self.respond(&line, |response| write_response(writer, response))
    }

    /// Serve newline-delimited requests from stdin until EOF or shutdown.
    pub fn serve(&self, shutdown: &AtomicBool) -> io::Result<()> {
        self.serve_with_io(&mut io::stdin().lock(), io::stdout(), shutdown)
    }

    /// Serve requests with custom I/O.
    ///
    /// At most `max_concurrent_requests` requests run at once, each on a
    /// pool thread; reading stalls while the pool is saturated. Responses may
    /// be written out of order and are correlated by `request_id`. Returns
    /// once every accepted request has been answered.
    pub fn serve_with_io<R: BufRead, W: Write + Send>(
        &self,
        reader: &mut R,
        writer: W,
        shutdown: &AtomicBool,
    ) -> io::Result<()> {
        let workers = self.ctx.config.max_concurrent_requests.max(1);
        let writer = Mutex::new(writer);
        let (sender, receiver) = mpsc::sync_channel::<String>(workers);
        let receiver = Mutex::new(receiver);

        thread::scope(|scope| -> io::Result<()> {
            // dropped when this closure returns, which lets the pool drain
            let sender = sender;
            for _ in 0..workers {
                let (writer, receiver) = (&writer, &receiver);
                scope.spawn(move || {
                    while let Some(line) = next_line(receiver) {
                        let result = self.respond(&line, |response| {
                            let mut guard = writer
                                .lock()
                                .map_err(|_| io::Error::new(io::ErrorKind::Other, "response writer poisoned"))?;
                            write_response(&mut *guard, response)
                        });
                        if let Err(e) = result {
                            tracing::error!(error = %e, "failed to write response");
                        }
                    }
                });
            }

            for line in reader.lines() {
                if shutdown.load(Ordering::SeqCst) {
                    tracing::info!("shutdown requested; no longer accepting requests");
                    break;
                }
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if sender.send(line).is_err() {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Handle one raw request line and pass the response to `write`.
    ///
    /// Deferred cleanup runs after `write` returns successfully; if the
    /// response could not be written the consumed artifact is kept.
    fn respond<F>(&self, line: &str, write: F) -> io::Result<()>
    where
        F: FnOnce(&RpcResponse) -> io::Result<()>,
    {
        let request = match parse_request(line) {
            Ok(req) => req,
            Err(e) => {
                // On parse error, return an error response with protocol_version: 0
                return write(&RpcResponse::error(PROTOCOL_VERSION_PROBE, String::new(), e));
            }
        };

        let span = request_span(&request.op, &request.request_id);
        let _guard = span.enter();

        let (protocol_version, handled) = match self.validate_protocol_version(&request) {
            Ok(()) => (response_version(&request), self.dispatch(&request)),
            Err(e) => (request.protocol_version, Handled::failed(e)),
        };

        let response = match handled.result {
            Ok(payload) => RpcResponse::success(protocol_version, request.request_id.clone(), payload),
            Err(e) => {
                tracing::info!(code = %e.code, message = %e.message, "request failed");
                RpcResponse::error(protocol_version, request.request_id.clone(), e)
            }
        };

        let written = write(&response);
        if let Some(cleanup) = handled.cleanup {
            if written.is_ok() {
                drop(cleanup);
            } else {
                cleanup.retain();
            }
        }
        written
    }

    /// Validate the protocol version in the request.
    fn validate_protocol_version(&self, request: &RpcRequest) -> Result<(), RpcError> {
        let config = &self.ctx.config;

        // probe requests MUST use protocol_version: 0
        if request.op == names::PROBE {
            if request.protocol_version != PROTOCOL_VERSION_PROBE {
                return Err(RpcError::unsupported_protocol(
                    request.protocol_version,
                    PROTOCOL_VERSION_PROBE,
                    PROTOCOL_VERSION_PROBE,
                ));
            }
            return Ok(());
        }

        if request.protocol_version < config.protocol_min || request.protocol_version > config.protocol_max {
            return Err(RpcError::unsupported_protocol(
                request.protocol_version,
                config.protocol_min,
                config.protocol_max,
            ));
        }

        Ok(())
    }

    /// Dispatch the request to the appropriate operation handler.
    fn dispatch(&self, request: &RpcRequest) -> Handled<'_> {
        match request.op.as_str() {
            names::PROBE => handlers::probe::handle(&self.ctx).into(),
            names::SPLIT => handlers::split::handle(request, &self.ctx).into(),
            names::COMPILE => handlers::compile::handle(request, &self.ctx),
            names::UPLOAD_URL => handlers::upload_url::handle(request, &self.ctx).into(),
            _ => Handled::failed(RpcError::unknown_operation(&request.op)),
        }
    }
}

/// probe responses must use protocol_version: 0
fn response_version(request: &RpcRequest) -> i32 {
    if request.op == names::PROBE {
        PROTOCOL_VERSION_PROBE
    } else {
        request.protocol_version
    }
}

/// Next queued request line, or `None` once the reader side is done.
fn next_line(receiver: &Mutex<mpsc::Receiver<String>>) -> Option<String> {
    let receiver = receiver.lock().ok()?;
    receiver.recv().ok()
}

fn parse_request(line: &str) -> Result<RpcRequest, RpcError> {
    if line.trim().is_empty() {
        return Err(RpcError::invalid_request("empty request"));
    }
    serde_json::from_str(line).map_err(|e| RpcError::invalid_request(format!("invalid JSON: {}", e)))
}

fn write_response<W: Write + ?Sized>(writer: &mut W, response: &RpcResponse) -> io::Result<()> {
    let json = serde_json::to_string(response).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ArtifactKey;
    use crate::mock_tools::fake_backend;
    use crate::store::{ArtifactStore, MemoryArtifactStore};
    use crate::testing::memory_context;
    use crate::tool::{ExternalTool, FnTool};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use cloudcc_protocol::ErrorCode;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_handler() -> (RpcHandler, MemoryArtifactStore, TempDir) {
        let (ctx, store, temp) = memory_context();
        (RpcHandler::new(ctx), store, temp)
    }

    fn roundtrip(handler: &RpcHandler, input: &str) -> RpcResponse {
        let mut reader = Cursor::new(input.to_string());
        let mut output = Vec::new();
        handler.run_with_io(&mut reader, &mut output).unwrap();
        serde_json::from_slice(&output).unwrap()
    }

    #[test]
    fn test_probe_request() {
        let (handler, _store, _temp) = create_handler();
        let response = roundtrip(
            &handler,
            r#"{"protocol_version":0,"op":"probe","request_id":"test-001","payload":{}}"#,
        );

        assert!(response.ok);
        assert_eq!(response.protocol_version, 0);
        assert_eq!(response.request_id, "test-001");
        assert!(response.payload.is_some());
    }

    #[test]
    fn test_probe_with_wrong_version() {
        let (handler, _store, _temp) = create_handler();
        let response = roundtrip(
            &handler,
            r#"{"protocol_version":1,"op":"probe","request_id":"test-002","payload":{}}"#,
        );

        assert!(!response.ok);
        assert_eq!(response.error.as_ref().unwrap().code, ErrorCode::UnsupportedProtocol);
    }

    #[test]
    fn test_non_probe_with_version_zero() {
        let (handler, _store, _temp) = create_handler();
        let response = roundtrip(
            &handler,
            r#"{"protocol_version":0,"op":"split","request_id":"test-003","payload":{}}"#,
        );

        assert!(!response.ok);
        assert_eq!(response.error.as_ref().unwrap().code, ErrorCode::UnsupportedProtocol);
    }

    #[test]
    fn test_invalid_json() {
        let (handler, _store, _temp) = create_handler();
        let response = roundtrip(&handler, "not valid json\n");

        assert!(!response.ok);
        assert_eq!(response.protocol_version, 0);
        assert_eq!(response.error.as_ref().unwrap().code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn test_unknown_operation() {
        let (handler, _store, _temp) = create_handler();
        let response = roundtrip(
            &handler,
            r#"{"protocol_version":1,"op":"link","request_id":"test-004","payload":{}}"#,
        );

        assert!(!response.ok);
        assert_eq!(response.error.as_ref().unwrap().code, ErrorCode::UnknownOperation);
    }

    #[test]
    fn test_compile_deletes_after_response() {
        let (handler, store, _temp) = create_handler();
        let key = ArtifactKey::generate();
        store.put(&key, b"ir").unwrap();

        let line = serde_json::to_string(&RpcRequest::new(
            1,
            "compile",
            "c-1",
            serde_json::json!({"key": key.as_str(), "backend_flags": "-O2"}),
        ))
        .unwrap();
        let response = roundtrip(&handler, &line);

        assert!(response.ok, "{:?}", response.error);
        let payload = response.payload.unwrap();
        let object = BASE64.decode(payload["object_base64"].as_str().unwrap()).unwrap();
        assert!(!object.is_empty());
        assert!(!store.contains(&key));
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_unwritten_compile_response_keeps_artifact() {
        let (handler, store, _temp) = create_handler();
        let key = ArtifactKey::generate();
        store.put(&key, b"ir").unwrap();

        let line = format!(
            r#"{{"protocol_version":1,"op":"compile","request_id":"c-2","payload":{{"key":"{}","backend_flags":"-O2"}}}}"#,
            key
        );
        let mut reader = Cursor::new(line);
        assert!(handler.run_with_io(&mut reader, &mut FailingWriter).is_err());
        assert!(store.exists(&key).unwrap());
    }

    #[test]
    fn test_serve_answers_every_request() {
        let (handler, _store, _temp) = create_handler();
        let mut input = String::new();
        for i in 0..8 {
            input.push_str(&format!(
                "{{\"protocol_version\":0,\"op\":\"probe\",\"request_id\":\"p-{}\",\"payload\":{{}}}}\n",
                i
            ));
        }
        input.push('\n');
        input.push_str("garbage\n");

        let mut output = Vec::new();
        let shutdown = AtomicBool::new(false);
        handler
            .serve_with_io(&mut Cursor::new(input), &mut output, &shutdown)
            .unwrap();

        let responses: Vec<RpcResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 9);
        assert_eq!(responses.iter().filter(|r| r.ok).count(), 8);
        let mut ids: Vec<_> = responses.iter().filter(|r| r.ok).map(|r| r.request_id.clone()).collect();
        ids.sort();
        assert_eq!(ids[0], "p-0");
    }

    #[test]
    fn test_serve_bounds_concurrent_requests() {
        let (mut ctx, store, _temp) = memory_context();
        ctx.config.max_concurrent_requests = 2;

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let inner = fake_backend();
        let (running, highest) = (Arc::clone(&active), Arc::clone(&peak));
        ctx.tools.backend = Arc::new(FnTool::new("slow-clang", move |args: &[String]| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            highest.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(25));
            let output = inner.invoke(args);
            running.fetch_sub(1, Ordering::SeqCst);
            output
        }));
        let handler = RpcHandler::new(ctx);

        let mut input = String::new();
        for i in 0..10 {
            let key = ArtifactKey::generate();
            store.put(&key, b"ir").unwrap();
            input.push_str(&format!(
                "{{\"protocol_version\":1,\"op\":\"compile\",\"request_id\":\"c-{}\",\"payload\":{{\"key\":\"{}\",\"backend_flags\":\"-O2\"}}}}\n",
                i, key
            ));
        }

        let mut output = Vec::new();
        let shutdown = AtomicBool::new(false);
        handler
            .serve_with_io(&mut Cursor::new(input), &mut output, &shutdown)
            .unwrap();

        let responses: Vec<RpcResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 10);
        assert!(responses.iter().all(|r| r.ok));
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
        assert!(store.is_empty());
    }

    #[test]
    fn test_serve_stops_on_shutdown() {
        let (handler, _store, _temp) = create_handler();
        let input = "{\"protocol_version\":0,\"op\":\"probe\",\"request_id\":\"p\",\"payload\":{}}\n";
        let mut output = Vec::new();
        let shutdown = AtomicBool::new(true);
        handler
            .serve_with_io(&mut Cursor::new(input), &mut output, &shutdown)
            .unwrap();
        assert!(output.is_empty());
    }
}
