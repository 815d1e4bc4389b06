//! External tool invocation.
//!
//! Runs an opaque executable with an argument vector and captures how it
//! ended plus everything it printed. A non-zero exit is a normal outcome;
//! only failing to start the process is an error.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cloudcc_protocol::{ToolDiagnostics, ToolExit};
use thiserror::Error;

/// Environment variable allowlist. Everything else is dropped.
pub const ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL", "LC_CTYPE"];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Errors from tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while running tool: {0}")]
    Io(#[from] io::Error),
}

/// Captured result of one tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit: ToolExit,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    /// A clean exit with the given output.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit: ToolExit::Exited { code: 0 },
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// A non-zero exit with the given stderr.
    pub fn failure(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            exit: ToolExit::Exited { code },
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit.is_success()
    }

    /// Wire form of this output, attributed to `tool`.
    pub fn diagnostics(&self, tool: &str) -> ToolDiagnostics {
        ToolDiagnostics {
            tool: tool.to_string(),
            exit: self.exit,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

/// An external executable with a command-line contract.
pub trait ExternalTool: Send + Sync {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Run the tool once and wait for it.
    fn invoke(&self, args: &[String]) -> Result<ToolOutput, ToolError>;
}

/// Adapts a closure into an [`ExternalTool`].
pub struct FnTool<F> {
    name: String,
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(&[String]) -> Result<ToolOutput, ToolError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> ExternalTool for FnTool<F>
where
    F: Fn(&[String]) -> Result<ToolOutput, ToolError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, args: &[String]) -> Result<ToolOutput, ToolError> {
        (self.f)(args)
    }
}

/// A real executable run as a child process.
#[derive(Debug, Clone)]
pub struct ProcessTool {
    program: PathBuf,
    name: String,
    fixed_args: Vec<String>,
    timeout: Option<Duration>,
    grace: Duration,
    shutdown: Option<Arc<AtomicBool>>,
}

impl ProcessTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.to_string_lossy().into_owned());
        Self {
            program,
            name,
            fixed_args: Vec::new(),
            timeout: None,
            grace: Duration::from_secs(5),
            shutdown: None,
        }
    }

    /// Arguments placed before the per-call arguments.
    pub fn with_fixed_args(mut self, args: Vec<String>) -> Self {
        self.fixed_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Time between SIGTERM and SIGKILL.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Flag that, once set, terminates any running invocation.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stream) = stream {
                let _ = stream.read_to_end(&mut buf);
            }
            buf
        })
    }

    /// Terminate a child process gracefully then forcefully.
    fn terminate_child(&self, child: &mut Child) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            let _ = signal::kill(pid, Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }

        let start = Instant::now();
        while start.elapsed() < self.grace {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }

        let _ = child.kill();
        let _ = child.wait();
        Ok(())
    }
}

fn exit_from_status(status: ExitStatus) -> ToolExit {
    if let Some(code) = status.code() {
        return ToolExit::Exited { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ToolExit::Signaled { signal };
        }
    }
    ToolExit::Exited { code: -1 }
}

impl ExternalTool for ProcessTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, args: &[String]) -> Result<ToolOutput, ToolError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.fixed_args)
            .args(args)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for key in ENV_ALLOWLIST {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }

        tracing::debug!(tool = %self.name, ?args, "invoking tool");
        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;

        let stdout_handle = Self::spawn_reader(child.stdout.take());
        let stderr_handle = Self::spawn_reader(child.stderr.take());

        let exit = loop {
            let deadline_passed = self.timeout.is_some_and(|t| start.elapsed() >= t);
            if deadline_passed || self.is_shutting_down() {
                tracing::warn!(
                    tool = %self.name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    shutdown = !deadline_passed,
                    "terminating tool"
                );
                self.terminate_child(&mut child)?;
                break ToolExit::TimedOut {
                    after_ms: start.elapsed().as_millis() as u64,
                };
            }

            match child.try_wait()? {
                Some(status) => break exit_from_status(status),
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();

        tracing::debug!(
            tool = %self.name,
            %exit,
            duration_ms = start.elapsed().as_millis() as u64,
            "tool finished"
        );
        Ok(ToolOutput { exit, stdout, stderr })
    }
}
