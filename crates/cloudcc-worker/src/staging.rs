//! Per-request staging area.
//!
//! Every request gets its own UUID-named directory under the staging root.
//! The directory is removed when the [`StagingDir`] is dropped, on success
//! and failure alike.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use thiserror::Error;
use uuid::Uuid;

/// Errors from staging operations.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("staging path already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("staging I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("tool produced no output file at {}", .0.display())]
    MissingOutput(PathBuf),
}

impl StagingError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AlreadyExists {
            return Self::AlreadyExists {
                path: path.to_path_buf(),
            };
        }
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Root directory under which request directories are created.
#[derive(Debug, Clone)]
pub struct StagingRoot {
    root: PathBuf,
}

impl StagingRoot {
    /// Open (creating if needed) a staging root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StagingError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Root path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory for one request.
    ///
    /// Uses `create_dir`, so a name collision surfaces as
    /// [`StagingError::AlreadyExists`] instead of sharing a directory.
    pub fn create_request(&self) -> Result<StagingDir, StagingError> {
        let path = self.root.join(Uuid::new_v4().simple().to_string());
        fs::create_dir(&path).map_err(|e| StagingError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "created staging directory");
        Ok(StagingDir { path })
    }
}

/// A request-owned staging directory, removed on drop.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside this directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Create a fresh UUID-named subdirectory.
    pub fn create_subdir(&self) -> Result<PathBuf, StagingError> {
        let path = self.path.join(Uuid::new_v4().simple().to_string());
        fs::create_dir(&path).map_err(|e| StagingError::io(&path, e))?;
        Ok(path)
    }

    /// Copy `reader` into `name`, returning the path and byte count.
    pub fn write_from(&self, name: &str, reader: &mut dyn Read) -> Result<(PathBuf, u64), StagingError> {
        let path = self.file(name);
        let mut file = fs::File::create(&path).map_err(|e| StagingError::io(&path, e))?;
        let written = io::copy(reader, &mut file).map_err(|e| StagingError::io(&path, e))?;
        file.flush().map_err(|e| StagingError::io(&path, e))?;
        Ok((path, written))
    }

    /// Inflate zlib data from `reader` into `name`, streaming.
    ///
    /// Corrupt or truncated input is reported as [`StagingError::Decompress`].
    pub fn inflate_from(&self, name: &str, reader: &mut dyn Read) -> Result<(PathBuf, u64), StagingError> {
        let path = self.file(name);
        let mut file = fs::File::create(&path).map_err(|e| StagingError::io(&path, e))?;
        let mut decoder = ZlibDecoder::new(reader);
        let written = io::copy(&mut decoder, &mut file).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                StagingError::Decompress(e.to_string())
            }
            _ => StagingError::io(&path, e),
        })?;
        file.flush().map_err(|e| StagingError::io(&path, e))?;
        Ok((path, written))
    }

    /// Read a file the tool was expected to write.
    pub fn read_output(&self, path: &Path) -> Result<Vec<u8>, StagingError> {
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StagingError::MissingOutput(path.to_path_buf()))
            }
            Err(e) => Err(StagingError::io(path, e)),
        }
    }

    /// Regular files directly inside `dir`, sorted by name.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, StagingError> {
        let entries = fs::read_dir(dir).map_err(|e| StagingError::io(dir, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StagingError::io(dir, e))?;
            let file_type = entry.file_type().map_err(|e| StagingError::io(&entry.path(), e))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}
