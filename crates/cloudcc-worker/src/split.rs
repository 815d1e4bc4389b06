//! Split stage.
//!
//! One source unit in, N partition artifacts out:
//!
//! 1. stage the source (fetching and inflating as needed)
//! 2. `frontend <flags…> <source> -o <canonical>`
//! 3. `splitter -j<chunks> <canonical> -o <parts>/`
//! 4. upload every partition under a fresh key, all or nothing
//!
//! The source artifact is never deleted here.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::thread;

use crate::key::ArtifactKey;
use crate::stage::{RequestState, RequestTracker, StageError, StageName};
use crate::staging::{StagingDir, StagingRoot};
use crate::store::{ArtifactStore, StoreError};
use crate::tool::{ExternalTool, ToolOutput};

const SOURCE_FILE: &str = "source";
const CANONICAL_FILE: &str = "canonical.bc";

/// Where the source unit comes from.
#[derive(Debug, Clone)]
pub enum SplitSource {
    Key(ArtifactKey),
    Inline(Vec<u8>),
}

/// Validated split request.
#[derive(Debug, Clone)]
pub struct SplitInput {
    pub source: SplitSource,
    pub compressed: bool,
    pub chunks: u32,
    /// Checked frontend arguments, placed before the fixed input/output.
    pub frontend_args: Vec<String>,
}

/// Result of a successful split.
#[derive(Debug, Clone)]
pub struct SplitManifest {
    /// Partition keys, in partition file name order.
    pub keys: Vec<ArtifactKey>,
    pub frontend: ToolOutput,
    pub splitter: ToolOutput,
}

/// The split stage and its collaborators.
pub struct SplitStage<'a> {
    pub store: &'a dyn ArtifactStore,
    pub staging: &'a StagingRoot,
    pub frontend: &'a dyn ExternalTool,
    pub splitter: &'a dyn ExternalTool,
}

impl<'a> SplitStage<'a> {
    /// Run the stage to completion.
    pub fn run(&self, input: &SplitInput) -> Result<SplitManifest, StageError> {
        let mut tracker = RequestTracker::new();
        let result = self.run_tracked(input, &mut tracker);
        match result {
            Ok(manifest) => {
                tracker.advance(RequestState::Succeeded);
                tracing::info!(partitions = manifest.keys.len(), "split complete");
                Ok(manifest)
            }
            Err(e) => Err(tracker.fail(e)),
        }
    }

    fn run_tracked(&self, input: &SplitInput, tracker: &mut RequestTracker) -> Result<SplitManifest, StageError> {
        let dir = self
            .staging
            .create_request()
            .map_err(StageError::staging(StageName::Fetch))?;
        let source_path = self.stage_source(&dir, input)?;
        tracker.advance(RequestState::Staged);

        let canonical = dir.file(CANONICAL_FILE);
        let mut args = input.frontend_args.clone();
        args.push(path_arg(&source_path));
        args.push("-o".to_string());
        args.push(path_arg(&canonical));
        let frontend = self.invoke(StageName::Frontend, self.frontend, &args)?;
        if !frontend.is_success() {
            return Err(StageError::ToolFailed {
                stage: StageName::Frontend,
                message: format!("{} {}", self.frontend.name(), frontend.exit),
                diagnostics: vec![frontend.diagnostics(self.frontend.name())],
            });
        }

        let parts_dir = dir
            .create_subdir()
            .map_err(StageError::staging(StageName::Splitter))?;
        let args = vec![
            format!("-j{}", input.chunks),
            path_arg(&canonical),
            "-o".to_string(),
            format!("{}/", path_arg(&parts_dir)),
        ];
        let splitter = self.invoke(StageName::Splitter, self.splitter, &args)?;
        let diagnostics = || {
            vec![
                frontend.diagnostics(self.frontend.name()),
                splitter.diagnostics(self.splitter.name()),
            ]
        };
        if !splitter.is_success() {
            return Err(StageError::ToolFailed {
                stage: StageName::Splitter,
                message: format!("{} {}", self.splitter.name(), splitter.exit),
                diagnostics: diagnostics(),
            });
        }
        tracker.advance(RequestState::ToolsInvoked);

        let partitions = dir
            .list_files(&parts_dir)
            .map_err(StageError::staging(StageName::Splitter))?;
        if partitions.is_empty() {
            return Err(StageError::ToolFailed {
                stage: StageName::Splitter,
                message: "splitter produced no partitions".to_string(),
                diagnostics: diagnostics(),
            });
        }
        if partitions.len() != input.chunks as usize {
            tracing::debug!(
                requested = input.chunks,
                produced = partitions.len(),
                "splitter produced a different partition count"
            );
        }

        let keys = self.upload_all(&partitions)?;
        Ok(SplitManifest {
            keys,
            frontend,
            splitter,
        })
    }

    fn stage_source(&self, dir: &StagingDir, input: &SplitInput) -> Result<PathBuf, StageError> {
        let mut reader: Box<dyn Read + '_> = match &input.source {
            SplitSource::Key(key) => self.store.get_stream(key).map_err(|source| StageError::Read {
                key: key.clone(),
                source,
            })?,
            SplitSource::Inline(bytes) => Box::new(bytes.as_slice()),
        };
        let staged = if input.compressed {
            dir.inflate_from(SOURCE_FILE, &mut reader)
        } else {
            dir.write_from(SOURCE_FILE, &mut reader)
        };
        let (path, size) = staged.map_err(StageError::staging(StageName::Fetch))?;
        tracing::debug!(bytes = size, compressed = input.compressed, "source staged");
        Ok(path)
    }

    fn invoke(&self, stage: StageName, tool: &dyn ExternalTool, args: &[String]) -> Result<ToolOutput, StageError> {
        tool.invoke(args).map_err(|source| StageError::Invocation {
            stage,
            tool: tool.name().to_string(),
            source,
        })
    }

    /// Upload every partition concurrently under fresh keys.
    ///
    /// If any upload fails, every key is deleted again, failed ones included
    /// since a failed write may still have left bytes behind, and no key is
    /// returned.
    fn upload_all(&self, partitions: &[PathBuf]) -> Result<Vec<ArtifactKey>, StageError> {
        let store = self.store;
        let results: Vec<(ArtifactKey, Result<(), StoreError>)> = thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .iter()
                .map(|path| {
                    let key = ArtifactKey::generate();
                    let upload_key = key.clone();
                    let handle = scope.spawn(move || {
                        let bytes = fs::read(path).map_err(|e| {
                            StoreError::Write(format!("cannot read partition {}: {}", path.display(), e))
                        })?;
                        store.put(&upload_key, &bytes)
                    });
                    (key, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(key, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(StoreError::Write("upload thread panicked".to_string())));
                    (key, result)
                })
                .collect()
        });

        let total = results.len();
        let mut keys = Vec::with_capacity(total);
        let mut errors = Vec::new();
        for (key, result) in results {
            if let Err(e) = result {
                tracing::warn!(key = %key, error = %e, "partition upload failed");
                errors.push(e);
            }
            keys.push(key);
        }

        if errors.is_empty() {
            return Ok(keys);
        }

        for key in &keys {
            if let Err(e) = store.delete(key) {
                tracing::warn!(key = %key, error = %e, "compensating delete failed");
            }
        }
        let failed = errors.len();
        let source = errors.swap_remove(0);
        Err(StageError::Write {
            failed,
            total,
            source,
        })
    }
}

fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_tools::{fake_frontend, fake_splitter, missing_tool};
    use crate::staging::StagingError;
    use crate::store::{FaultInjection, MemoryArtifactStore};
    use crate::tool::FnTool;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: MemoryArtifactStore,
        staging: StagingRoot,
        frontend: Arc<dyn ExternalTool>,
        splitter: Arc<dyn ExternalTool>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let staging = StagingRoot::new(temp.path().join("staging")).unwrap();
            Self {
                _temp: temp,
                store: MemoryArtifactStore::new("test"),
                staging,
                frontend: fake_frontend(),
                splitter: fake_splitter(),
            }
        }

        fn stage(&self) -> SplitStage<'_> {
            SplitStage {
                store: &self.store,
                staging: &self.staging,
                frontend: self.frontend.as_ref(),
                splitter: self.splitter.as_ref(),
            }
        }

        fn staging_is_empty(&self) -> bool {
            fs::read_dir(self.staging.path()).unwrap().next().is_none()
        }
    }

    fn inline(bytes: Vec<u8>, chunks: u32) -> SplitInput {
        SplitInput {
            source: SplitSource::Inline(bytes),
            compressed: false,
            chunks,
            frontend_args: Vec::new(),
        }
    }

    fn source_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_split_inline_into_four() {
        let fx = Fixture::new();
        let source = source_bytes(10_000);
        let manifest = fx.stage().run(&inline(source.clone(), 4)).unwrap();

        assert_eq!(manifest.keys.len(), 4);
        assert!(manifest.frontend.is_success());
        assert!(manifest.splitter.is_success());

        let mut rejoined = Vec::new();
        for key in &manifest.keys {
            rejoined.extend(fx.store.bytes(key).unwrap());
        }
        assert_eq!(rejoined, source);
        assert!(fx.staging_is_empty());
    }

    #[test]
    fn test_split_from_stored_key_keeps_source() {
        let fx = Fixture::new();
        let source_key = ArtifactKey::generate();
        fx.store.put(&source_key, &source_bytes(100)).unwrap();

        let input = SplitInput {
            source: SplitSource::Key(source_key.clone()),
            compressed: false,
            chunks: 3,
            frontend_args: vec!["-O2".to_string()],
        };
        let manifest = fx.stage().run(&input).unwrap();
        assert_eq!(manifest.keys.len(), 3);
        assert!(fx.store.contains(&source_key));
        assert_eq!(fx.store.len(), 4);
    }

    #[test]
    fn test_compressed_source_is_inflated() {
        let fx = Fixture::new();
        let source = source_bytes(5000);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&source).unwrap();

        let mut input = inline(encoder.finish().unwrap(), 2);
        input.compressed = true;
        let manifest = fx.stage().run(&input).unwrap();

        let total: usize = manifest.keys.iter().map(|k| fx.store.bytes(k).unwrap().len()).sum();
        assert_eq!(total, 5000);
    }

    #[test]
    fn test_corrupt_compressed_source_fails_before_tools() {
        let mut fx = Fixture::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        fx.frontend = Arc::new(FnTool::new("counting", move |_: &[String]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::success(Vec::new()))
        }));

        let mut input = inline(b"this is not zlib".to_vec(), 4);
        input.compressed = true;
        let err = fx.stage().run(&input).unwrap_err();

        assert!(matches!(
            err,
            StageError::Staging {
                stage: StageName::Fetch,
                source: StagingError::Decompress(_),
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(fx.store.is_empty());
        assert!(fx.staging_is_empty());
    }

    #[test]
    fn test_frontend_failure_skips_splitter() {
        let fx = Fixture::new();
        let mut input = inline(source_bytes(100), 2);
        input.frontend_args = vec!["-DFAKE_FAIL".to_string()];

        match fx.stage().run(&input).unwrap_err() {
            StageError::ToolFailed {
                stage, diagnostics, ..
            } => {
                assert_eq!(stage, StageName::Frontend);
                assert_eq!(diagnostics.len(), 1);
                assert!(diagnostics[0].stderr.contains("FAKE_FAIL"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_zero_partitions_is_a_splitter_failure() {
        let fx = Fixture::new();
        match fx.stage().run(&inline(Vec::new(), 4)).unwrap_err() {
            StageError::ToolFailed {
                stage, diagnostics, ..
            } => {
                assert_eq!(stage, StageName::Splitter);
                assert_eq!(diagnostics.len(), 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_failed_upload_rolls_back_all_partitions() {
        let fx = Fixture::new();
        fx.store.set_faults(FaultInjection {
            fail_nth_put: Some(4),
            ..Default::default()
        });

        match fx.stage().run(&inline(source_bytes(10_000), 4)).unwrap_err() {
            StageError::Write { failed, total, .. } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fx.store.is_empty());
        assert_eq!(fx.store.delete_calls(), 4);
    }

    #[test]
    fn test_partially_written_partition_is_removed() {
        let fx = Fixture::new();
        fx.store.set_faults(FaultInjection {
            fail_nth_put: Some(2),
            partial_puts: true,
            ..Default::default()
        });

        let err = fx.stage().run(&inline(source_bytes(10_000), 4)).unwrap_err();
        assert!(matches!(err, StageError::Write { failed: 1, total: 4, .. }));
        assert_eq!(fx.store.delete_calls(), 4);
        assert!(fx.store.is_empty(), "orphaned keys: {:?}", fx.store.keys());
    }

    #[test]
    fn test_partition_count_follows_splitter_output() {
        let data = source_bytes(3);
        for chunks in 1..=8u32 {
            let fx = Fixture::new();
            let manifest = fx.stage().run(&inline(data.clone(), chunks)).unwrap();

            let written = (chunks as usize).min(data.len());
            assert_eq!(manifest.keys.len(), written, "chunks={}", chunks);
            assert_eq!(fx.store.len(), written, "chunks={}", chunks);
            for key in &manifest.keys {
                assert!(fx.store.contains(key));
            }

            let rejoined: Vec<u8> = manifest
                .keys
                .iter()
                .flat_map(|k| fx.store.bytes(k).unwrap())
                .collect();
            assert_eq!(rejoined, data);
        }
    }

    #[test]
    fn test_missing_source_key() {
        let fx = Fixture::new();
        let input = SplitInput {
            source: SplitSource::Key(ArtifactKey::generate()),
            compressed: false,
            chunks: 2,
            frontend_args: Vec::new(),
        };
        let err = fx.stage().run(&input).unwrap_err();
        assert!(matches!(
            err,
            StageError::Read {
                source: StoreError::NotFound(_),
                ..
            }
        ));
    }

    #[test]
    fn test_missing_splitter_binary() {
        let mut fx = Fixture::new();
        fx.splitter = missing_tool("llvm-split");
        let err = fx.stage().run(&inline(source_bytes(10), 2)).unwrap_err();
        assert!(matches!(
            err,
            StageError::Invocation {
                stage: StageName::Splitter,
                ..
            }
        ));
    }

    #[test]
    fn test_repeated_splits_never_share_keys() {
        let fx = Fixture::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let manifest = fx.stage().run(&inline(source_bytes(64), 4)).unwrap();
            for key in manifest.keys {
                assert!(seen.insert(key));
            }
        }
        assert_eq!(seen.len(), 80);
    }
}
