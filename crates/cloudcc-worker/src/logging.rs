//! Logging setup.
//!
//! Logs always go to stderr: stdout is the RPC channel.

use std::io;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines, one event per line.
    Json,
    /// Human-readable output.
    #[default]
    Pretty,
}

/// Initialize the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` controls levels; the default is `info`.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(io::stderr))
                    .init();
            }
        }
    });
}

/// Span covering one RPC request.
#[must_use]
pub fn request_span(op: &str, request_id: &str) -> Span {
    tracing::info_span!("request", op = op, request_id = request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_request_span() {
        let span = request_span("split", "req-1");
        let _guard = span.enter();
        tracing::debug!("inside request span");
    }
}
