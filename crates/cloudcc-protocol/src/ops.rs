//! Operation-specific types.

pub mod compile;
pub mod probe;
pub mod split;
pub mod upload;

pub use compile::{CompileRequest, CompileResponse};
pub use probe::{ProbeRequest, ProbeResponse};
pub use split::{SourceRef, SplitRequest, SplitResponse};
pub use upload::{UploadUrlRequest, UploadUrlResponse};

/// Known operation names.
pub mod names {
    pub const PROBE: &str = "probe";
    pub const SPLIT: &str = "split";
    pub const COMPILE: &str = "compile";
    pub const UPLOAD_URL: &str = "upload_url";
}
