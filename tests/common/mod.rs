//! In-process pipeline harness.
//!
//! Runs the real worker RPC handler behind the client's `Transport` trait,
//! backed by the in-memory store and the fake tools.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use cloudcc::{Client, Transport, TransportError};
use cloudcc_protocol::{RpcRequest, RpcResponse};
use cloudcc_worker::mock_tools::fake_toolset;
use cloudcc_worker::{
    ArtifactKey, ArtifactStore, MemoryArtifactStore, RpcHandler, StagingRoot, Toolset, WorkerConfig,
    WorkerContext,
};
use tempfile::TempDir;

/// Transport that hands each request line straight to an `RpcHandler`.
pub struct InProcessTransport {
    handler: RpcHandler,
}

impl InProcessTransport {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            handler: RpcHandler::new(ctx),
        }
    }
}

impl Transport for InProcessTransport {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let mut output = Vec::new();
        self.handler.run_with_io(&mut Cursor::new(line.into_bytes()), &mut output)?;
        serde_json::from_slice(&output).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

pub struct Harness {
    pub client: Client,
    pub store: MemoryArtifactStore,
    pub temp: TempDir,
}

impl Harness {
    pub fn key(raw: &str) -> ArtifactKey {
        ArtifactKey::parse(raw).unwrap()
    }
}

/// A probed client talking to a worker with the fake toolset.
pub fn harness() -> Harness {
    harness_with(fake_toolset())
}

pub fn harness_with(tools: Toolset) -> Harness {
    let store = MemoryArtifactStore::new("test");
    let (client, temp) = client_over(Arc::new(store.clone()), tools);
    Harness { client, store, temp }
}

/// A probed client over an arbitrary store.
pub fn client_over(store: Arc<dyn ArtifactStore>, tools: Toolset) -> (Client, TempDir) {
    let temp = TempDir::new().unwrap();
    let mut config = WorkerConfig::default();
    config.staging_root = temp.path().join("staging");
    let staging = StagingRoot::new(&config.staging_root).unwrap();
    let ctx = WorkerContext::new(config, store, staging, tools);

    let mut client = Client::new(Arc::new(InProcessTransport::new(ctx)));
    client.probe().unwrap();
    (client, temp)
}

/// Deterministic test source of `len` bytes.
pub fn source(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
