//! Directory-backed artifact store.
//!
//! Artifacts live under a two-level fan-out:
//! `<root>/<namespace>/<key[0:2]>/<key>`
//!
//! Features:
//! - Atomic writes via write-to-temp-then-rename
//! - Idempotent overwrite and idempotent delete
//! - Orphaned temp file cleanup and age-based reaping

use std::fs::{self, File};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;
use walkdir::WalkDir;

use super::{ArtifactReader, ArtifactStore, SignedUpload, StoreError, UrlSigner};
use crate::key::ArtifactKey;

const TEMP_DIR: &str = ".tmp";
const TEMP_PREFIX: &str = ".tmp.";

/// Artifact store rooted at a local (or mounted) directory.
#[derive(Debug)]
pub struct FsArtifactStore {
    /// `<root>/<namespace>`
    namespace_dir: PathBuf,
    namespace: String,
    signer: UrlSigner,
}

impl FsArtifactStore {
    /// Open (creating if needed) the store at `root` for `namespace`.
    pub fn new(root: impl AsRef<Path>, namespace: &str, signer: UrlSigner) -> Result<Self, StoreError> {
        let namespace_dir = root.as_ref().join(namespace);
        fs::create_dir_all(&namespace_dir).map_err(|e| {
            StoreError::Write(format!("cannot create {}: {}", namespace_dir.display(), e))
        })?;

        // Verify the store is writable
        let probe = namespace_dir.join(".store_test");
        File::create(&probe)
            .and_then(|_| fs::remove_file(&probe))
            .map_err(|e| {
                StoreError::Write(format!("{} is not writable: {}", namespace_dir.display(), e))
            })?;

        Ok(Self {
            namespace_dir,
            namespace: namespace.to_string(),
            signer,
        })
    }

    fn artifact_path(&self, key: &ArtifactKey) -> PathBuf {
        self.namespace_dir.join(key.shard()).join(key.as_str())
    }

    fn temp_dir(&self) -> PathBuf {
        self.namespace_dir.join(TEMP_DIR)
    }

    fn write_atomic(&self, key: &ArtifactKey, bytes: &[u8]) -> io::Result<()> {
        let temp_dir = self.temp_dir();
        fs::create_dir_all(&temp_dir)?;
        let temp_path = temp_dir.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4().simple()));

        let written = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        let final_path = self.artifact_path(key);
        let placed = final_path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::rename(&temp_path, &final_path));
        if let Err(e) = placed {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }

    /// Verify a presented upload signature for `key`.
    pub fn verify_upload_url(&self, key: &ArtifactKey, expires: i64, sig: &str) -> bool {
        self.signer.verify(key, expires, sig, chrono::Utc::now())
    }

    /// Remove temp files left behind by interrupted writes.
    pub fn cleanup_orphaned_temps(&self, older_than: Duration) -> Result<usize, StoreError> {
        let temp_dir = self.temp_dir();
        if !temp_dir.exists() {
            return Ok(0);
        }

        let mut cleaned = 0;
        let entries = fs::read_dir(&temp_dir).map_err(|e| StoreError::Transient(e.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(TEMP_PREFIX));
            if is_temp && is_older_than(&path, older_than) && fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    /// Delete artifacts last written more than `max_age` ago.
    ///
    /// The pipeline never expires artifacts itself; this is the hook for an
    /// external reaper (cron, `cloudcc-worker reap`).
    pub fn reap(&self, max_age: Duration) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in WalkDir::new(&self.namespace_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = entry.map_err(|e| StoreError::Transient(e.to_string()))?;
            if entry.file_type().is_file()
                && is_older_than(entry.path(), max_age)
                && fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }

        // Drop empty shard directories (fails silently if not empty)
        if let Ok(shards) = fs::read_dir(&self.namespace_dir) {
            for shard in shards.flatten() {
                let path = shard.path();
                let hidden = shard.file_name().to_string_lossy().starts_with('.');
                if path.is_dir() && !hidden {
                    let _ = fs::remove_dir(&path);
                }
            }
        }

        Ok(removed)
    }

    /// Number of artifacts currently stored.
    pub fn artifact_count(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for entry in WalkDir::new(&self.namespace_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = entry.map_err(|e| StoreError::Transient(e.to_string()))?;
            if entry.file_type().is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

fn is_older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|elapsed| elapsed >= age)
}

impl ArtifactStore for FsArtifactStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), StoreError> {
        self.write_atomic(key, bytes)
            .map_err(|e| StoreError::Write(format!("{}: {}", key, e)))
    }

    fn get_stream(&self, key: &ArtifactKey) -> Result<ArtifactReader, StoreError> {
        match File::open(self.artifact_path(key)) {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(key.clone())),
            Err(e) => Err(StoreError::Transient(format!("{}: {}", key, e))),
        }
    }

    fn delete(&self, key: &ArtifactKey) -> Result<(), StoreError> {
        match fs::remove_file(self.artifact_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Delete(format!("{}: {}", key, e))),
        }
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        Ok(self.artifact_path(key).is_file())
    }

    fn signed_upload_url(&self, key: &ArtifactKey, ttl: Duration) -> Result<SignedUpload, StoreError> {
        self.signer.sign(key, ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn create_store(dir: &Path) -> FsArtifactStore {
        let signer = UrlSigner::new(b"test".to_vec(), "http://store.test", "bucket");
        FsArtifactStore::new(dir, "bucket", signer).unwrap()
    }

    fn read_all(store: &FsArtifactStore, key: &ArtifactKey) -> Vec<u8> {
        let mut out = Vec::new();
        store.get_stream(key).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_put_and_get() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        let key = ArtifactKey::generate();

        store.put(&key, b"partition bytes").unwrap();

        assert!(store.exists(&key).unwrap());
        assert_eq!(read_all(&store, &key), b"partition bytes");
        assert_eq!(store.namespace(), "bucket");
    }

    #[test]
    fn test_put_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        let key = ArtifactKey::generate();

        store.put(&key, b"first").unwrap();
        store.put(&key, b"second").unwrap();

        assert_eq!(read_all(&store, &key), b"second");
        assert_eq!(store.artifact_count().unwrap(), 1);
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        let key = ArtifactKey::generate();

        let err = store.get_stream(&key).err().unwrap();
        assert!(matches!(err, StoreError::NotFound(ref k) if *k == key));
        assert_eq!(err.read_kind(), cloudcc_protocol::ReadErrorKind::NotFound);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        let key = ArtifactKey::generate();

        store.put(&key, b"x").unwrap();
        store.delete(&key).unwrap();
        store.delete(&key).unwrap();
        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    fn test_fan_out_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        let key = ArtifactKey::generate();
        store.put(&key, b"x").unwrap();

        let expected = temp_dir
            .path()
            .join("bucket")
            .join(key.shard())
            .join(key.as_str());
        assert!(expected.is_file());
    }

    #[test]
    fn test_no_temp_files_left_after_put() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        store.put(&ArtifactKey::generate(), b"x").unwrap();

        let leftovers = fs::read_dir(store.temp_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_cleanup_orphaned_temps() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        fs::create_dir_all(store.temp_dir()).unwrap();
        fs::write(store.temp_dir().join(".tmp.orphan"), b"partial").unwrap();
        fs::write(store.temp_dir().join("unrelated"), b"keep").unwrap();

        assert_eq!(store.cleanup_orphaned_temps(Duration::ZERO).unwrap(), 1);
        assert!(store.temp_dir().join("unrelated").exists());
    }

    #[test]
    fn test_reap_by_age() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        let key = ArtifactKey::generate();
        store.put(&key, b"old").unwrap();

        assert_eq!(store.reap(Duration::from_secs(3600)).unwrap(), 0);
        assert!(store.exists(&key).unwrap());

        assert_eq!(store.reap(Duration::ZERO).unwrap(), 1);
        assert!(!store.exists(&key).unwrap());
        assert_eq!(store.artifact_count().unwrap(), 0);
    }

    #[test]
    fn test_signed_upload_url_verifies() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = create_store(temp_dir.path());
        let key = ArtifactKey::generate();

        let signed = store.signed_upload_url(&key, Duration::from_secs(300)).unwrap();
        let query = signed.url.split_once('?').unwrap().1;
        let mut expires = 0i64;
        let mut sig = "";
        for kv in query.split('&') {
            match kv.split_once('=') {
                Some(("expires", v)) => expires = v.parse().unwrap(),
                Some(("sig", v)) => sig = v,
                _ => {}
            }
        }
        assert!(store.verify_upload_url(&key, expires, sig));
        assert!(!store.verify_upload_url(&key, expires, "AAAA"));
    }
}
