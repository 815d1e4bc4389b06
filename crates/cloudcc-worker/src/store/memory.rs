//! In-memory artifact store with fault injection.
//!
//! Thread-safe via `RwLock`. Used by tests and by in-process pipelines that
//! need to simulate a misbehaving backend.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{ArtifactReader, ArtifactStore, SignedUpload, StoreError, UrlSigner};
use crate::key::ArtifactKey;

/// Failure injection configuration.
#[derive(Debug, Clone, Default)]
pub struct FaultInjection {
    /// Fail the n-th call to `put` (1-based, counted across all threads).
    pub fail_nth_put: Option<usize>,
    /// Fail every `put`.
    pub fail_all_puts: bool,
    /// Fail every `get_stream` with a transient error.
    pub fail_gets: bool,
    /// Fail every `delete`.
    pub fail_deletes: bool,
    /// Injected `put` failures still store the first half of the bytes,
    /// like a backend without atomic writes.
    pub partial_puts: bool,
}

/// Thread-safe in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryArtifactStore {
    namespace: String,
    objects: Arc<RwLock<HashMap<ArtifactKey, Vec<u8>>>>,
    faults: Arc<RwLock<FaultInjection>>,
    put_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
    signer: UrlSigner,
}

impl MemoryArtifactStore {
    /// Create an empty store for `namespace`.
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            faults: Arc::new(RwLock::new(FaultInjection::default())),
            put_calls: Arc::new(AtomicUsize::new(0)),
            delete_calls: Arc::new(AtomicUsize::new(0)),
            signer: UrlSigner::ephemeral("memory://", namespace),
        }
    }

    /// Replace the fault injection configuration.
    pub fn set_faults(&self, faults: FaultInjection) {
        if let Ok(mut current) = self.faults.write() {
            *current = faults;
        }
    }

    fn faults(&self) -> FaultInjection {
        self.faults.read().map(|f| f.clone()).unwrap_or_default()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    /// Stored bytes for `key`, if present.
    pub fn bytes(&self, key: &ArtifactKey) -> Option<Vec<u8>> {
        self.objects.read().ok()?.get(key).cloned()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.objects.read().map(|objects| objects.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored keys.
    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `put` calls so far, failed ones included.
    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete` calls so far, failed ones included.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), StoreError> {
        let call = self.put_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let faults = self.faults();
        let failing = faults.fail_all_puts || faults.fail_nth_put == Some(call);
        if failing && !faults.partial_puts {
            return Err(StoreError::Write(format!("injected failure on put #{}", call)));
        }

        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::Write("lock poisoned".to_string()))?;
        if failing {
            objects.insert(key.clone(), bytes[..bytes.len() / 2].to_vec());
            return Err(StoreError::Write(format!("injected partial write on put #{}", call)));
        }
        objects.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn get_stream(&self, key: &ArtifactKey) -> Result<ArtifactReader, StoreError> {
        if self.faults().fail_gets {
            return Err(StoreError::Transient("injected read failure".to_string()));
        }
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::Transient("lock poisoned".to_string()))?;
        objects
            .get(key)
            .map(|data| Box::new(Cursor::new(data.clone())) as ArtifactReader)
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    fn delete(&self, key: &ArtifactKey) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults().fail_deletes {
            return Err(StoreError::Delete("injected delete failure".to_string()));
        }
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::Delete("lock poisoned".to_string()))?;
        objects.remove(key);
        Ok(())
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        Ok(self.contains(key))
    }

    fn signed_upload_url(&self, key: &ArtifactKey, ttl: Duration) -> Result<SignedUpload, StoreError> {
        self.signer.sign(key, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_roundtrip() {
        let store = MemoryArtifactStore::new("test");
        let key = ArtifactKey::generate();
        store.put(&key, b"hello").unwrap();

        let mut out = Vec::new();
        store.get_stream(&key).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_fail_nth_put() {
        let store = MemoryArtifactStore::new("test");
        store.set_faults(FaultInjection {
            fail_nth_put: Some(2),
            ..Default::default()
        });

        assert!(store.put(&ArtifactKey::generate(), b"1").is_ok());
        assert!(matches!(store.put(&ArtifactKey::generate(), b"2"), Err(StoreError::Write(_))));
        assert!(store.put(&ArtifactKey::generate(), b"3").is_ok());
        assert_eq!(store.len(), 2);
        assert_eq!(store.put_calls(), 3);
    }

    #[test]
    fn test_partial_put_leaves_truncated_object() {
        let store = MemoryArtifactStore::new("test");
        store.set_faults(FaultInjection {
            fail_all_puts: true,
            partial_puts: true,
            ..Default::default()
        });

        let key = ArtifactKey::generate();
        assert!(matches!(store.put(&key, b"abcd"), Err(StoreError::Write(_))));
        assert_eq!(store.bytes(&key), Some(b"ab".to_vec()));
    }

    #[test]
    fn test_injected_read_and_delete_failures() {
        let store = MemoryArtifactStore::new("test");
        let key = ArtifactKey::generate();
        store.put(&key, b"x").unwrap();
        store.set_faults(FaultInjection {
            fail_gets: true,
            fail_deletes: true,
            ..Default::default()
        });

        assert!(matches!(store.get_stream(&key).err(), Some(StoreError::Transient(_))));
        assert!(store.delete(&key).is_err());
        assert!(store.contains(&key));
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryArtifactStore::new("test");
        let clone = store.clone();
        let key = ArtifactKey::generate();
        clone.put(&key, b"x").unwrap();
        assert!(store.contains(&key));
    }
}
