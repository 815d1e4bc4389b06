//! cloudcc protocol types
//!
//! Defines the JSON RPC envelope spoken between the `cloudcc` client and
//! `cloudcc-worker`, the stable error-code registry, and the payloads of the
//! split, compile, upload-url and probe operations.

pub mod diagnostics;
pub mod error;
pub mod request;
pub mod response;
pub mod ops;

pub use diagnostics::{ToolDiagnostics, ToolExit};
pub use error::{ErrorClass, ErrorCode, ReadErrorKind, RpcError};
pub use request::RpcRequest;
pub use response::RpcResponse;

/// Protocol version used for probe requests (sentinel value).
pub const PROTOCOL_VERSION_PROBE: i32 = 0;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;

/// Current worker version string.
pub const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");
