//! cloudcc client
//!
//! Talks to `cloudcc-worker` to split a compilation unit into independently
//! compilable partitions and compile those partitions in parallel.

pub mod client;
pub mod config;
pub mod transport;

pub use client::{
    compress, Client, ClientError, ClientResult, CompiledObject, FailureKind, SplitOptions, SplitSource,
};
pub use config::{ClientConfig, ConfigError};
pub use transport::{CommandTransport, Transport, TransportError};
