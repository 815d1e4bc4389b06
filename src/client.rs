//! Worker RPC client.
//!
//! Handles protocol negotiation, payload encoding and error mapping for the
//! split, compile and upload-url operations, plus parallel compile fan-out.

use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cloudcc_protocol::ops::{
    names, CompileRequest, CompileResponse, ProbeResponse, SourceRef, SplitRequest, SplitResponse,
    UploadUrlRequest, UploadUrlResponse,
};
use cloudcc_protocol::{
    ErrorClass, ErrorCode, RpcError, RpcRequest, ToolDiagnostics, PROTOCOL_MAX, PROTOCOL_MIN,
    PROTOCOL_VERSION_PROBE,
};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::transport::{Transport, TransportError};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("worker error {0}")]
    Remote(RpcError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("version negotiation failed: client [{client_min},{client_max}] vs worker [{worker_min},{worker_max}]")]
    VersionNegotiationFailed {
        client_min: i32,
        client_max: i32,
        worker_min: i32,
        worker_max: i32,
    },

    #[error("inline source is {size} bytes, worker accepts at most {max}; upload it and split by key")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("cannot decode worker response: {0}")]
    Decode(String),

    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),
}

/// Failure kind for exit code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Local failure (exit code 1)
    Local = 1,
    /// Transport or protocol failure (exit code 20)
    Transport = 20,
    /// A tool failed or could not start on the worker (exit code 40)
    Tool = 40,
    /// The worker refused the request (exit code 64)
    Rejected = 64,
    /// Store or staging failure on the worker (exit code 70)
    Artifacts = 70,
    /// No common protocol version (exit code 91)
    Incompatible = 91,
}

impl ClientError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ClientError::Transport(_) | ClientError::Protocol(_) | ClientError::Decode(_) => {
                FailureKind::Transport
            }
            ClientError::VersionNegotiationFailed { .. } => FailureKind::Incompatible,
            ClientError::PayloadTooLarge { .. } => FailureKind::Rejected,
            ClientError::Compress(_) => FailureKind::Local,
            ClientError::Remote(error) => match error.code {
                ErrorCode::UnsupportedProtocol => FailureKind::Incompatible,
                ErrorCode::ToolReportedFailure | ErrorCode::StageInvocationError => FailureKind::Tool,
                ErrorCode::ReadError | ErrorCode::WriteError | ErrorCode::StagingError => {
                    FailureKind::Artifacts
                }
                code => match code.class() {
                    ErrorClass::Client => FailureKind::Rejected,
                    ErrorClass::Downstream | ErrorClass::Internal => FailureKind::Artifacts,
                },
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.failure_kind() as i32
    }

    /// Tool diagnostics carried by a remote error.
    pub fn diagnostics(&self) -> &[ToolDiagnostics] {
        match self {
            ClientError::Remote(error) => error.diagnostics.as_slice(),
            _ => &[],
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Source of a split request.
#[derive(Debug, Clone, Copy)]
pub enum SplitSource<'a> {
    /// Bytes sent inline in the request.
    Bytes(&'a [u8]),
    /// An artifact already in the store.
    Key(&'a str),
}

/// Split options.
#[derive(Debug, Clone, Default)]
pub struct SplitOptions {
    pub chunks: u32,
    /// Inline bytes: zlib-compress before sending. Key source: the stored artifact is compressed.
    pub compress: bool,
    pub frontend_flags: String,
}

/// A compiled partition.
#[derive(Debug, Clone)]
pub struct CompiledObject {
    pub object: Vec<u8>,
    pub diagnostics: ToolDiagnostics,
}

/// Compress `data` with zlib at `level` (0-9).
pub fn compress(data: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// RPC client for one worker endpoint.
pub struct Client {
    transport: Arc<dyn Transport>,
    compression_level: u32,
    /// Negotiated protocol version (set after probe)
    negotiated_version: Option<i32>,
    worker: Option<ProbeResponse>,
    session: String,
    request_counter: AtomicU64,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let session = uuid::Uuid::new_v4().simple().to_string();
        Self {
            transport,
            compression_level: 6,
            negotiated_version: None,
            worker: None,
            session: session[..12].to_string(),
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// What the worker reported at probe time.
    pub fn worker(&self) -> Option<&ProbeResponse> {
        self.worker.as_ref()
    }

    fn next_request_id(&self) -> String {
        let counter = self.request_counter.fetch_add(1, Ordering::SeqCst);
        format!("cc-{}-{:06}", self.session, counter)
    }

    fn protocol_version(&self) -> ClientResult<i32> {
        self.negotiated_version.ok_or_else(|| {
            ClientError::Protocol("protocol version not negotiated - call probe() first".to_string())
        })
    }

    fn call<T: DeserializeOwned>(&self, version: i32, op: &str, payload: impl Serialize) -> ClientResult<T> {
        let payload = serde_json::to_value(payload).map_err(TransportError::from)?;
        let request = RpcRequest::new(version, op, self.next_request_id(), payload);
        let _span = tracing::debug_span!("rpc", op, request_id = %request.request_id).entered();

        let response = self.transport.execute(&request)?;
        if !response.ok {
            let error = response.error.ok_or_else(|| {
                ClientError::Protocol(format!("{} failed with no error details", op))
            })?;
            tracing::debug!(code = %error.code, "worker returned error");
            return Err(ClientError::Remote(error));
        }

        let payload = response
            .payload
            .ok_or_else(|| ClientError::Protocol(format!("{} response missing payload", op)))?;
        serde_json::from_value(payload).map_err(|e| ClientError::Decode(format!("{} payload: {}", op, e)))
    }

    /// Probe the worker and negotiate the protocol version.
    ///
    /// This must be called before any other operation.
    pub fn probe(&mut self) -> ClientResult<&ProbeResponse> {
        let info: ProbeResponse = self.call(PROTOCOL_VERSION_PROBE, names::PROBE, serde_json::json!({}))?;

        // Use the highest version both sides support.
        let low = PROTOCOL_MIN.max(info.protocol_min);
        let high = PROTOCOL_MAX.min(info.protocol_max);
        if low > high {
            return Err(ClientError::VersionNegotiationFailed {
                client_min: PROTOCOL_MIN,
                client_max: PROTOCOL_MAX,
                worker_min: info.protocol_min,
                worker_max: info.protocol_max,
            });
        }

        tracing::debug!(version = high, worker = %info.worker_version, "negotiated protocol");
        self.negotiated_version = Some(high);
        Ok(&*self.worker.insert(info))
    }

    /// Split a compilation unit into partitions; returns the manifest.
    pub fn split(&self, source: SplitSource<'_>, options: &SplitOptions) -> ClientResult<SplitResponse> {
        let version = self.protocol_version()?;

        let source = match source {
            SplitSource::Key(key) => SourceRef::Key(key.to_string()),
            SplitSource::Bytes(data) => {
                let compressed;
                let body = if options.compress {
                    compressed = compress(data, self.compression_level).map_err(ClientError::Compress)?;
                    tracing::debug!(raw = data.len(), compressed = compressed.len(), "compressed source");
                    compressed.as_slice()
                } else {
                    data
                };
                if let Some(max) = self.worker.as_ref().map(|w| w.max_inline_bytes) {
                    if body.len() as u64 > max {
                        return Err(ClientError::PayloadTooLarge {
                            size: body.len() as u64,
                            max,
                        });
                    }
                }
                SourceRef::Inline(STANDARD.encode(body))
            }
        };

        let request = SplitRequest {
            source,
            compressed: options.compress,
            chunks: options.chunks,
            frontend_flags: options.frontend_flags.clone(),
        };
        let manifest: SplitResponse = self.call(version, names::SPLIT, &request)?;
        tracing::info!(partitions = manifest.keys.len(), "split complete");
        Ok(manifest)
    }

    /// Compile one partition and return the decoded object bytes.
    pub fn compile(&self, key: &str, backend_flags: &str) -> ClientResult<CompiledObject> {
        let version = self.protocol_version()?;
        let request = CompileRequest {
            key: key.to_string(),
            backend_flags: backend_flags.to_string(),
        };
        let response: CompileResponse = self.call(version, names::COMPILE, &request)?;

        let object = STANDARD
            .decode(response.object_base64.as_bytes())
            .map_err(|e| ClientError::Decode(format!("object_base64: {}", e)))?;
        if object.len() as u64 != response.object_size {
            return Err(ClientError::Decode(format!(
                "object is {} bytes, worker reported {}",
                object.len(),
                response.object_size
            )));
        }
        Ok(CompiledObject {
            object,
            diagnostics: response.diagnostics,
        })
    }

    /// Compile every key with at most `jobs` requests in flight.
    ///
    /// Results come back in key order; one failure does not stop the others.
    pub fn compile_all(&self, keys: &[String], backend_flags: &str, jobs: usize) -> Vec<ClientResult<CompiledObject>> {
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<ClientResult<CompiledObject>>>> =
            Mutex::new((0..keys.len()).map(|_| None).collect());

        let workers = jobs.clamp(1, keys.len().max(1));
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(key) = keys.get(index) else {
                        break;
                    };
                    let result = self.compile(key, backend_flags);
                    if let Err(e) = &result {
                        tracing::warn!(key = %key, error = %e, "compile failed");
                    }
                    if let Ok(mut slots) = results.lock() {
                        slots[index] = Some(result);
                    }
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| Err(ClientError::Protocol("compile worker thread panicked".to_string())))
            })
            .collect()
    }

    /// Ask the worker for a pre-signed upload URL.
    pub fn upload_url(&self, expires_in_seconds: Option<u64>) -> ClientResult<UploadUrlResponse> {
        let version = self.protocol_version()?;
        self.call(version, names::UPLOAD_URL, UploadUrlRequest { expires_in_seconds })
    }
}
