//! cloudcc worker entrypoint
//!
//! Usage:
//!   cloudcc-worker [--config FILE] rpc
//!   cloudcc-worker [--config FILE] serve
//!   cloudcc-worker [--config FILE] reap --max-age-secs N
//!
//! `rpc` reads a single JSON request from stdin and writes one response to
//! stdout, suitable for an SSH forced-command. `serve` keeps reading
//! newline-delimited requests until EOF. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use cloudcc_worker::{init_logging, open_store, LogFormat, RpcHandler, WorkerConfig, WorkerContext};

#[derive(Parser)]
#[command(name = "cloudcc-worker", version, about = "cloudcc split/compile worker")]
struct Cli {
    /// Worker config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format; overrides the config file
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one request from stdin
    Rpc,
    /// Handle newline-delimited requests until EOF
    Serve,
    /// Delete artifacts older than the given age
    Reap {
        #[arg(long)]
        max_age_secs: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match WorkerConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                init_logging(cli.log_format.unwrap_or_default());
                tracing::error!(error = %e, "failed to load config");
                return ExitCode::FAILURE;
            }
        },
        None => WorkerConfig::default(),
    };
    init_logging(cli.log_format.unwrap_or(config.log_format));

    match cli.command {
        Commands::Rpc => run_rpc(config, false),
        Commands::Serve => run_rpc(config, true),
        Commands::Reap { max_age_secs } => run_reap(&config, Duration::from_secs(max_age_secs)),
    }
}

fn run_rpc(config: WorkerConfig, serve: bool) -> ExitCode {
    let shutdown = Arc::new(AtomicBool::new(false));
    if serve {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::warn!("interrupt received; terminating in-flight tools");
            flag.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!(error = %e, "failed to install interrupt handler");
        }
    }

    let ctx = match WorkerContext::from_config(config, Arc::clone(&shutdown)) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "worker setup failed");
            return ExitCode::FAILURE;
        }
    };
    let handler = RpcHandler::new(ctx);

    let result = if serve { handler.serve(&shutdown) } else { handler.run() };
    if let Err(e) = result {
        tracing::error!(error = %e, "RPC handler error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run_reap(config: &WorkerConfig, max_age: Duration) -> ExitCode {
    let store = match open_store(&config.store) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "cannot open artifact store");
            return ExitCode::FAILURE;
        }
    };

    let temps = store.cleanup_orphaned_temps(Duration::from_secs(3600));
    let reaped = store.reap(max_age);
    match (temps, reaped) {
        (Ok(temps), Ok(reaped)) => {
            tracing::info!(reaped, orphaned_temps = temps, "reap complete");
            ExitCode::SUCCESS
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "reap failed");
            ExitCode::FAILURE
        }
    }
}
