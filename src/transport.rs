//! Transport abstraction for worker RPC.
//!
//! A transport takes one request and returns one response. The production
//! transport spawns a command line per request (a local `cloudcc-worker rpc`
//! or the same behind `ssh`), writes the request as a single JSON line and
//! reads a single JSON line back.

use std::io::Write;
use std::process::{Command, Stdio};

use cloudcc_protocol::{RpcRequest, RpcResponse};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One request, one response.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError>;
}

/// Transport that runs a worker command line for each request.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    program: String,
    args: Vec<String>,
}

impl CommandTransport {
    /// Build from a full command line, e.g. `["ssh", "builder", "cloudcc-worker", "rpc"]`.
    pub fn new(command: &[String]) -> Result<Self, TransportError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| TransportError::Protocol("worker command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Transport for CommandTransport {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        let request_json = serde_json::to_string(request)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Dropping stdin closes it so the worker sees EOF after one line.
        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "{}", request_json)?;
            stdin.flush()?;
        }

        let output = child.wait_with_output()?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        // The worker answers with a response line even when it exits non-zero.
        let line = output
            .stdout
            .split(|&b| b == b'\n')
            .find(|line| !line.iter().all(u8::is_ascii_whitespace));
        let Some(line) = line else {
            return Err(TransportError::Protocol(format!(
                "{} exited with {} and no response: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        };

        let response: RpcResponse = serde_json::from_slice(line)
            .map_err(|e| TransportError::Protocol(format!("invalid response JSON: {}", e)))?;

        if response.request_id != request.request_id {
            return Err(TransportError::Protocol(format!(
                "response id {} does not match request id {}",
                response.request_id, request.request_id
            )));
        }

        tracing::debug!(
            program = %self.program,
            status = %output.status,
            stderr_bytes = output.stderr.len(),
            "worker command finished"
        );
        Ok(response)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> CommandTransport {
        CommandTransport::new(&["/bin/sh".to_string(), "-c".to_string(), script.to_string()]).unwrap()
    }

    fn probe_request() -> RpcRequest {
        RpcRequest::new(0, "probe", "req-1", json!({}))
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(matches!(CommandTransport::new(&[]), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn test_reads_response_line() {
        let transport =
            sh(r#"read line; echo '{"protocol_version":0,"request_id":"req-1","ok":true,"payload":{}}'"#);
        let response = transport.execute(&probe_request()).unwrap();
        assert!(response.ok);
        assert_eq!(response.request_id, "req-1");
    }

    #[test]
    fn test_error_response_with_nonzero_exit() {
        let transport = sh(
            r#"read line; echo '{"protocol_version":1,"request_id":"req-1","ok":false,"error":{"code":"STAGING_ERROR","message":"disk"}}'; exit 1"#,
        );
        let response = transport.execute(&probe_request()).unwrap();
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().message, "disk");
    }

    #[test]
    fn test_no_output_is_protocol_error() {
        let transport = sh("read line; echo boom >&2; exit 3");
        match transport.execute(&probe_request()) {
            Err(TransportError::Protocol(message)) => assert!(message.contains("boom")),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_request_id() {
        let transport =
            sh(r#"read line; echo '{"protocol_version":0,"request_id":"other","ok":true,"payload":{}}'"#);
        assert!(matches!(
            transport.execute(&probe_request()),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_missing_program() {
        let transport = CommandTransport::new(&["/nonexistent/cloudcc-worker".to_string()]).unwrap();
        assert!(matches!(
            transport.execute(&probe_request()),
            Err(TransportError::Spawn { .. })
        ));
    }
}
