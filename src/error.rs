//! Crate-wide error type.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::ThreadHandle;
use crate::sink::SinkError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Lock selector did not name a known strategy.
    #[error("unknown lock strategy '{0}' (expected exclusive, reader-writer or none)")]
    UnknownLockKind(String),

    /// Producers must be asked for at least one task.
    #[error("task count must be positive, got {0}")]
    InvalidTaskCount(i64),

    /// Spawn arguments are validated before the thread starts.
    #[error("invalid spawn argument {0}: negative value")]
    InvalidSpawnArgument(i64),

    #[error("{0} is not tracked by the registry")]
    UnknownThread(ThreadHandle),

    #[error("{0} panicked")]
    ThreadPanicked(ThreadHandle),

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Run plan cannot be executed as requested.
    #[error("invalid run plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
