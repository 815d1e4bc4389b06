//! cloudcc worker
//!
//! Runs the two pipeline stages behind a stdin/stdout JSON RPC surface:
//! `split` turns one compilation unit into N partition artifacts, `compile`
//! turns one partition artifact into object bytes. The artifact store is the
//! handoff medium between them.
//!
//! This crate can be used in two modes:
//! - **Standalone binary**: `cloudcc-worker rpc|serve`, locally or over SSH
//! - **In-process library**: with [`MemoryArtifactStore`] and the fakes in
//!   [`mock_tools`] for tests

pub mod compile;
pub mod config;
pub mod context;
pub mod handlers;
pub mod key;
pub mod logging;
pub mod mock_tools;
pub mod rpc;
pub mod split;
pub mod stage;
pub mod staging;
pub mod store;
pub mod tool;

#[cfg(test)]
mod testing;

pub use compile::{CompileAttempt, CompileInput, CompileOutput, CompileStage, ConsumedArtifact};
pub use config::{ConfigError, StoreConfig, ToolCommand, ToolsConfig, WorkerConfig};
pub use context::{open_store, SetupError, Toolset, WorkerContext};
pub use key::{ArtifactKey, KeyError};
pub use logging::{init_logging, LogFormat};
pub use rpc::RpcHandler;
pub use split::{SplitInput, SplitManifest, SplitSource, SplitStage};
pub use stage::{RequestState, RequestTracker, StageError, StageName};
pub use staging::{StagingDir, StagingError, StagingRoot};
pub use store::{
    ArtifactStore, FaultInjection, FsArtifactStore, MemoryArtifactStore, SignedUpload, StoreError, UrlSigner,
};
pub use tool::{ExternalTool, FnTool, ProcessTool, ToolError, ToolOutput};
