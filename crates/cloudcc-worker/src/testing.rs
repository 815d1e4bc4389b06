//! Test fixtures shared by the handler and RPC tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::config::WorkerConfig;
use crate::context::WorkerContext;
use crate::mock_tools::fake_toolset;
use crate::staging::StagingRoot;
use crate::store::MemoryArtifactStore;

/// A context backed by an in-memory store and the fake tools.
///
/// The returned store handle shares state with the context's store.
pub fn memory_context() -> (WorkerContext, MemoryArtifactStore, TempDir) {
    let temp = TempDir::new().unwrap();
    let mut config = WorkerConfig::default();
    config.staging_root = temp.path().join("staging");

    let store = MemoryArtifactStore::new("test");
    let staging = StagingRoot::new(&config.staging_root).unwrap();
    let ctx = WorkerContext::new(config, Arc::new(store.clone()), staging, fake_toolset());
    (ctx, store, temp)
}
