//! cloudcc CLI
//!
//! Entry point for the `cloudcc` command-line tool. Splits a compilation
//! unit on a worker and compiles the resulting partitions.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cloudcc::{Client, ClientConfig, ClientError, CommandTransport, SplitOptions, SplitSource};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudcc")]
#[command(about = "Distributed split/compile client", version)]
struct Cli {
    /// Client config file (TOML)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a compilation unit and print the partition keys
    Split {
        /// Where to write the keys, one per line
        #[arg(long, short = 'o', default_value = "-")]
        output: PathBuf,

        /// zlib-compress the source before sending it
        #[arg(long)]
        compress: bool,

        /// Number of partitions to request
        #[arg(long)]
        chunks: Option<u32>,

        /// Flags for the frontend
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        frontend_flags: String,

        /// Split an artifact already in the store instead of a file
        #[arg(long, conflicts_with = "input")]
        key: Option<String>,

        /// Source file, or - for stdin
        #[arg(required_unless_present = "key")]
        input: Option<PathBuf>,
    },

    /// Compile one partition and write the object file
    Compile {
        /// Where to write the object
        #[arg(long, short = 'o', default_value = "-")]
        output: PathBuf,

        /// Flags for the backend
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        backend_flags: String,

        /// File holding the key, or - for stdin
        #[arg(default_value = "-")]
        key_file: PathBuf,
    },

    /// Compile every key of a manifest in parallel
    CompileAll {
        /// Directory for the objects, written as <index>.o
        #[arg(long, short = 'o')]
        output_dir: PathBuf,

        /// Flags for the backend
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        backend_flags: String,

        /// Requests in flight
        #[arg(long, short = 'j')]
        jobs: Option<usize>,

        /// Manifest file (one key per line), or - for stdin
        #[arg(default_value = "-")]
        manifest: PathBuf,
    },

    /// Get a pre-signed URL for uploading a large source
    UploadUrl {
        /// URL lifetime in seconds
        #[arg(long)]
        expires_in: Option<u64>,
    },

    /// Show worker capabilities
    Probe,
}

/// CLI failure: message plus exit code.
struct Failure {
    code: u8,
    message: String,
}

impl From<ClientError> for Failure {
    fn from(e: ClientError) -> Self {
        print_diagnostics(&e);
        Self {
            code: u8::try_from(e.exit_code()).unwrap_or(1),
            message: e.to_string(),
        }
    }
}

impl From<io::Error> for Failure {
    fn from(e: io::Error) -> Self {
        Self {
            code: 1,
            message: e.to_string(),
        }
    }
}

fn fail(message: impl Into<String>) -> Failure {
    Failure {
        code: 1,
        message: message.into(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("cloudcc: {}", failure.message);
            ExitCode::from(failure.code)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), Failure> {
    let config = match &cli.config {
        Some(path) => ClientConfig::load(path).map_err(|e| fail(e.to_string()))?,
        None => ClientConfig::default(),
    };

    let transport = CommandTransport::new(&config.worker_command).map_err(ClientError::from)?;
    let mut client = Client::new(Arc::new(transport)).with_compression_level(config.compression_level);
    client.probe()?;

    match cli.command {
        Commands::Split {
            output,
            compress,
            chunks,
            frontend_flags,
            key,
            input,
        } => {
            let options = SplitOptions {
                chunks: chunks.unwrap_or(config.default_chunks),
                compress,
                frontend_flags,
            };
            let manifest = match (&key, &input) {
                (Some(key), _) => client.split(SplitSource::Key(key), &options)?,
                (None, Some(input)) => {
                    let data = read_input(input)?;
                    if data.is_empty() {
                        return Err(fail("input is empty"));
                    }
                    client.split(SplitSource::Bytes(&data), &options)?
                }
                (None, None) => return Err(fail("either a source file or --key is required")),
            };

            let mut text = manifest.keys.join("\n");
            text.push('\n');
            write_output(&output, text.as_bytes())
        }

        Commands::Compile {
            output,
            backend_flags,
            key_file,
        } => {
            let keys = read_keys(&key_file)?;
            let [key] = keys.as_slice() else {
                return Err(fail(format!("expected exactly one key, found {}", keys.len())));
            };
            let compiled = client.compile(key, &backend_flags)?;
            write_output(&output, &compiled.object)
        }

        Commands::CompileAll {
            output_dir,
            backend_flags,
            jobs,
            manifest,
        } => {
            let keys = read_keys(&manifest)?;
            fs::create_dir_all(&output_dir)?;

            let results = client.compile_all(&keys, &backend_flags, jobs.unwrap_or(config.jobs));
            let mut first_failure = None;
            for (index, result) in results.into_iter().enumerate() {
                match result {
                    Ok(compiled) => fs::write(output_dir.join(format!("{}.o", index)), &compiled.object)?,
                    Err(e) => {
                        eprintln!("cloudcc: {}: {}", keys[index], e);
                        first_failure.get_or_insert(Failure::from(e));
                    }
                }
            }
            match first_failure {
                Some(failure) => Err(Failure {
                    message: "one or more partitions failed to compile".to_string(),
                    ..failure
                }),
                None => Ok(()),
            }
        }

        Commands::UploadUrl { expires_in } => {
            let upload = client.upload_url(expires_in)?;
            print_json(&upload)
        }

        Commands::Probe => match client.worker() {
            Some(info) => print_json(info),
            None => Err(fail("worker did not report capabilities")),
        },
    }
}

fn read_input(path: &Path) -> io::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut data = Vec::new();
        io::stdin().lock().read_to_end(&mut data)?;
        Ok(data)
    } else {
        fs::read(path)
    }
}

fn read_keys(path: &Path) -> io::Result<Vec<String>> {
    let text = String::from_utf8_lossy(&read_input(path)?).into_owned();
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn write_output(path: &Path, data: &[u8]) -> Result<(), Failure> {
    if path == Path::new("-") {
        let mut stdout = io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()?;
    } else {
        fs::write(path, data)?;
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Failure> {
    let text = serde_json::to_string_pretty(value).map_err(|e| fail(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn print_diagnostics(error: &ClientError) {
    for diag in error.diagnostics() {
        if diag.stderr.is_empty() && diag.stdout.is_empty() {
            continue;
        }
        eprintln!("--- {} ({}) ---", diag.tool, diag.exit);
        eprint!("{}", diag.stderr);
        if !diag.stdout.is_empty() {
            eprint!("{}", diag.stdout);
        }
    }
}
