//! Compile stage.
//!
//! Fetches one partition, runs `backend <flags…> <input> -o <output>` and
//! returns the object bytes. Once the partition has been fetched it is
//! considered consumed: the stage hands back a [`ConsumedArtifact`] that
//! deletes it when dropped, which the caller does after the response is out.

use crate::key::ArtifactKey;
use crate::stage::{RequestState, RequestTracker, StageError, StageName};
use crate::staging::StagingRoot;
use crate::store::ArtifactStore;
use crate::tool::{ExternalTool, ToolOutput};

const INPUT_FILE: &str = "input.bc";
const OUTPUT_FILE: &str = "output.o";

/// Validated compile request.
#[derive(Debug, Clone)]
pub struct CompileInput {
    pub key: ArtifactKey,
    /// Checked backend arguments, placed before the fixed input/output.
    pub backend_args: Vec<String>,
}

/// Result of a successful compile.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub object: Vec<u8>,
    pub backend: ToolOutput,
}

/// Deferred best-effort delete of a fetched partition.
#[derive(Debug)]
pub struct ConsumedArtifact<'a> {
    store: &'a dyn ArtifactStore,
    key: ArtifactKey,
    armed: bool,
}

impl<'a> ConsumedArtifact<'a> {
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// Keep the artifact after all, e.g. when the response never reached
    /// the caller and a retry will need it.
    pub fn retain(mut self) {
        self.armed = false;
        tracing::info!(key = %self.key, "retaining consumed artifact");
    }
}

impl Drop for ConsumedArtifact<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.store.delete(&self.key) {
            Ok(()) => tracing::debug!(key = %self.key, "deleted consumed artifact"),
            Err(e) => tracing::warn!(key = %self.key, error = %e, "failed to delete consumed artifact"),
        }
    }
}

/// Outcome of a compile attempt.
///
/// `consumed` is present whenever the partition was fetched, whether or not
/// the backend succeeded.
#[derive(Debug)]
pub struct CompileAttempt<'a> {
    pub result: Result<CompileOutput, StageError>,
    pub consumed: Option<ConsumedArtifact<'a>>,
}

/// The compile stage and its collaborators.
pub struct CompileStage<'a> {
    pub store: &'a dyn ArtifactStore,
    pub staging: &'a StagingRoot,
    pub backend: &'a dyn ExternalTool,
}

impl<'a> CompileStage<'a> {
    /// Run the stage to completion.
    pub fn run(&self, input: &CompileInput) -> CompileAttempt<'a> {
        let mut tracker = RequestTracker::new();
        let mut consumed = None;
        let result = match self.run_tracked(input, &mut tracker, &mut consumed) {
            Ok(output) => {
                tracker.advance(RequestState::Succeeded);
                tracing::info!(key = %input.key, object_size = output.object.len(), "compile complete");
                Ok(output)
            }
            Err(e) => Err(tracker.fail(e)),
        };
        CompileAttempt { result, consumed }
    }

    fn run_tracked(
        &self,
        input: &CompileInput,
        tracker: &mut RequestTracker,
        consumed: &mut Option<ConsumedArtifact<'a>>,
    ) -> Result<CompileOutput, StageError> {
        let dir = self
            .staging
            .create_request()
            .map_err(StageError::staging(StageName::Fetch))?;

        let mut reader = self.store.get_stream(&input.key).map_err(|source| StageError::Read {
            key: input.key.clone(),
            source,
        })?;
        let (input_path, size) = dir
            .write_from(INPUT_FILE, &mut reader)
            .map_err(StageError::staging(StageName::Fetch))?;
        *consumed = Some(ConsumedArtifact {
            store: self.store,
            key: input.key.clone(),
            armed: true,
        });
        tracing::debug!(key = %input.key, bytes = size, "partition staged");
        tracker.advance(RequestState::Staged);

        let output_path = dir.file(OUTPUT_FILE);
        let mut args = input.backend_args.clone();
        args.push(input_path.to_string_lossy().into_owned());
        args.push("-o".to_string());
        args.push(output_path.to_string_lossy().into_owned());

        let backend = self.backend.invoke(&args).map_err(|source| StageError::Invocation {
            stage: StageName::Backend,
            tool: self.backend.name().to_string(),
            source,
        })?;
        tracker.advance(RequestState::ToolsInvoked);

        if !backend.is_success() {
            return Err(StageError::ToolFailed {
                stage: StageName::Backend,
                message: format!("{} {}", self.backend.name(), backend.exit),
                diagnostics: vec![backend.diagnostics(self.backend.name())],
            });
        }

        let object = dir
            .read_output(&output_path)
            .map_err(StageError::staging(StageName::Backend))?;
        Ok(CompileOutput { object, backend })
    }
}
