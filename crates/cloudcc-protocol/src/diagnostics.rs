//! Tool diagnostics records.
//!
//! Every external tool run is reported back to the client verbatim: how it
//! ended and what it printed. The worker never interprets tool output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How an external tool run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolExit {
    /// The process exited on its own with this code.
    Exited { code: i32 },
    /// The process was killed by a signal it did not expect.
    Signaled { signal: i32 },
    /// The worker killed the process after its deadline or on shutdown.
    TimedOut { after_ms: u64 },
}

impl ToolExit {
    /// Only a clean zero exit counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

impl fmt::Display for ToolExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exit code {}", code),
            Self::Signaled { signal } => write!(f, "killed by signal {}", signal),
            Self::TimedOut { after_ms } => write!(f, "timed out after {} ms", after_ms),
        }
    }
}

/// Diagnostics of a single tool run, as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDiagnostics {
    /// Tool name (frontend, splitter, backend executable).
    pub tool: String,
    /// How the run ended.
    pub exit: ToolExit,
    /// Captured stdout, decoded lossily as UTF-8.
    pub stdout: String,
    /// Captured stderr, decoded lossily as UTF-8.
    pub stderr: String,
}
