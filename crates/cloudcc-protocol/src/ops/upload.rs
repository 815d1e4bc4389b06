//! Upload handoff types.
//!
//! Large sources can be pushed straight to the store with a pre-signed URL
//! and then split by key, so they never transit the worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upload-url request payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadUrlRequest {
    /// Requested URL lifetime; the worker clamps it to its configured maximum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<u64>,
}

/// Upload-url response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadUrlResponse {
    /// Fresh artifact key the upload will land under.
    pub key: String,
    /// Pre-signed PUT URL.
    pub url: String,
    /// When the URL stops being accepted.
    pub expires_at: DateTime<Utc>,
}
