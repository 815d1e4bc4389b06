//! Explicit dependencies of request handling.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigError, StoreConfig, ToolCommand, WorkerConfig};
use crate::staging::{StagingError, StagingRoot};
use crate::store::{ArtifactStore, FsArtifactStore, StoreError, UrlSigner};
use crate::tool::{ExternalTool, ProcessTool};

/// Errors building a worker context.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("artifact store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("staging setup failed: {0}")]
    Staging(#[from] StagingError),
}

/// The three external tools the stages run.
#[derive(Clone)]
pub struct Toolset {
    pub frontend: Arc<dyn ExternalTool>,
    pub splitter: Arc<dyn ExternalTool>,
    pub backend: Arc<dyn ExternalTool>,
}

/// Everything a handler needs, passed explicitly.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: WorkerConfig,
    pub store: Arc<dyn ArtifactStore>,
    pub staging: StagingRoot,
    pub tools: Toolset,
}

impl WorkerContext {
    /// Assemble a context from explicit parts.
    pub fn new(config: WorkerConfig, store: Arc<dyn ArtifactStore>, staging: StagingRoot, tools: Toolset) -> Self {
        Self {
            config,
            store,
            staging,
            tools,
        }
    }

    /// Build the production context: filesystem store and process tools.
    ///
    /// `shutdown` is wired into every tool so in-flight invocations are
    /// terminated when it is set.
    pub fn from_config(config: WorkerConfig, shutdown: Arc<AtomicBool>) -> Result<Self, SetupError> {
        config.validate()?;

        let store = open_store(&config.store)?;
        let staging = StagingRoot::new(&config.staging_root)?;

        let grace = Duration::from_secs(config.tools.termination_grace_secs);
        let build = |command: &ToolCommand| -> Arc<dyn ExternalTool> {
            Arc::new(
                ProcessTool::new(&command.program)
                    .with_fixed_args(command.args.clone())
                    .with_timeout(command.timeout())
                    .with_grace(grace)
                    .with_shutdown(Arc::clone(&shutdown)),
            )
        };
        let tools = Toolset {
            frontend: build(&config.tools.frontend),
            splitter: build(&config.tools.splitter),
            backend: build(&config.tools.backend),
        };

        tracing::info!(
            store = %config.store.root.display(),
            namespace = %config.store.namespace,
            staging = %config.staging_root.display(),
            "worker context ready"
        );
        Ok(Self::new(config, Arc::new(store), staging, tools))
    }
}

/// Open the filesystem artifact store described by `config`.
pub fn open_store(config: &StoreConfig) -> Result<FsArtifactStore, SetupError> {
    let signer = match config.signing_secret()? {
        Some(secret) => UrlSigner::new(secret, &config.public_base_url, &config.namespace),
        None => {
            tracing::warn!("no signing secret configured; upload URLs will not survive a restart");
            UrlSigner::ephemeral(&config.public_base_url, &config.namespace)
        }
    };
    Ok(FsArtifactStore::new(&config.root, &config.namespace, signer)?)
}
