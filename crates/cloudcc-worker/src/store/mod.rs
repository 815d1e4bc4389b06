//! Artifact store.
//!
//! Key-addressed blob storage used as the handoff medium between the split
//! and compile stages. The stages only see the [`ArtifactStore`] trait; the
//! concrete backend is chosen when the worker context is built.

mod fs;
mod memory;
mod signer;

pub use fs::FsArtifactStore;
pub use memory::{FaultInjection, MemoryArtifactStore};
pub use signer::{SignedUpload, UrlSigner};

use std::io::Read;
use std::time::Duration;

use cloudcc_protocol::ReadErrorKind;
use thiserror::Error;

use crate::key::ArtifactKey;

/// Errors from artifact store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact '{0}' not found")]
    NotFound(ArtifactKey),

    #[error("store read failed: {0}")]
    Transient(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("store delete failed: {0}")]
    Delete(String),

    #[error("URL signing failed: {0}")]
    Signing(String),
}

impl StoreError {
    /// Read failure kind for the error envelope.
    pub fn read_kind(&self) -> ReadErrorKind {
        match self {
            Self::NotFound(_) => ReadErrorKind::NotFound,
            _ => ReadErrorKind::Transient,
        }
    }
}

/// Streaming reader over an artifact's bytes.
pub type ArtifactReader = Box<dyn Read + Send>;

/// Key-addressed blob storage.
///
/// Per-key operations are independently atomic; the stages need nothing
/// stronger.
pub trait ArtifactStore: Send + Sync {
    /// Namespace (bucket) this store reads and writes.
    fn namespace(&self) -> &str;

    /// Write `bytes` under `key`, overwriting any previous content.
    fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), StoreError>;

    /// Open `key` for streaming reads.
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent.
    fn get_stream(&self, key: &ArtifactKey) -> Result<ArtifactReader, StoreError>;

    /// Delete `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &ArtifactKey) -> Result<(), StoreError>;

    /// Whether `key` currently exists.
    fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError>;

    /// Issue a time-limited URL a client can PUT `key` to directly.
    fn signed_upload_url(&self, key: &ArtifactKey, ttl: Duration) -> Result<SignedUpload, StoreError>;
}

impl std::fmt::Debug for dyn ArtifactStore + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("namespace", &self.namespace())
            .finish()
    }
}
