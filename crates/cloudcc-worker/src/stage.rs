//! Shared stage plumbing: stage names, the per-request state machine and
//! the stage error type with its mapping onto the wire error envelope.

use std::fmt;

use cloudcc_protocol::{ToolDiagnostics, RpcError};
use thiserror::Error;

use crate::key::ArtifactKey;
use crate::staging::StagingError;
use crate::store::StoreError;
use crate::tool::ToolError;

/// Pipeline step a request can fail at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageName {
    Fetch,
    Frontend,
    Splitter,
    Upload,
    Backend,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Frontend => "frontend",
            Self::Splitter => "splitter",
            Self::Upload => "upload",
            Self::Backend => "backend",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Staged,
    ToolsInvoked,
    Succeeded,
    Failed(StageName),
}

impl RequestState {
    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }

    /// Check if a transition from this state to `next` is valid.
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Received, Staged) => true,
            (Staged, ToolsInvoked) => true,
            (ToolsInvoked, Succeeded) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => f.write_str("received"),
            Self::Staged => f.write_str("staged"),
            Self::ToolsInvoked => f.write_str("tools_invoked"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(stage) => write!(f, "failed_at_{}", stage),
        }
    }
}

/// Tracks a request through its states, logging each transition.
#[derive(Debug)]
pub struct RequestTracker {
    state: RequestState,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            state: RequestState::Received,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: RequestState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = %self.state, to = %next, "invalid request state transition");
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "request state transition");
        self.state = next;
    }

    /// Record `error` as the terminal failure and hand it back.
    pub fn fail(&mut self, error: StageError) -> StageError {
        self.advance(RequestState::Failed(error.stage()));
        error
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from the split and compile stages.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to fetch artifact {key}: {source}")]
    Read {
        key: ArtifactKey,
        #[source]
        source: StoreError,
    },

    #[error("{failed} of {total} partition uploads failed: {source}")]
    Write {
        failed: usize,
        total: usize,
        #[source]
        source: StoreError,
    },

    #[error("{stage} tool could not be started: {source}")]
    Invocation {
        stage: StageName,
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error("{stage} failed: {message}")]
    ToolFailed {
        stage: StageName,
        message: String,
        diagnostics: Vec<ToolDiagnostics>,
    },

    #[error("staging failed during {stage}: {source}")]
    Staging {
        stage: StageName,
        #[source]
        source: StagingError,
    },
}

impl StageError {
    /// Attribute a staging failure to `stage`, for use with `map_err`.
    pub fn staging(stage: StageName) -> impl FnOnce(StagingError) -> StageError {
        move |source| StageError::Staging { stage, source }
    }

    /// The stage this error is attributed to.
    pub fn stage(&self) -> StageName {
        match self {
            Self::Read { .. } => StageName::Fetch,
            Self::Write { .. } => StageName::Upload,
            Self::Invocation { stage, .. } | Self::ToolFailed { stage, .. } | Self::Staging { stage, .. } => {
                *stage
            }
        }
    }
}

impl From<StageError> for RpcError {
    fn from(err: StageError) -> Self {
        let message = err.to_string();
        match err {
            StageError::Read { key, source } => {
                RpcError::read_error(key.as_str(), source.read_kind(), message)
            }
            StageError::Write { failed, total, .. } => RpcError::write_error(failed, total, message),
            StageError::Invocation { stage, tool, .. } => {
                RpcError::stage_invocation(stage.as_str(), &tool, message)
            }
            StageError::ToolFailed {
                stage, diagnostics, ..
            } => RpcError::tool_failure(stage.as_str(), message, diagnostics),
            StageError::Staging { .. } => RpcError::staging(message),
        }
    }
}
