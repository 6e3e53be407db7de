//! Run configuration loaded from TOML and/or command-line overrides.
//!
//! ```toml
//! lock = "reader-writer"
//! producers = 4
//! consumers = 4
//! readers = 1
//! tasks = 100
//! sink = "records.csv"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::lock::LockKind;
use crate::orchestrator::{DEFAULT_CONSUMER_IDLE, Pacing, RunPlan};

/// Log level accepted by the config file.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing(&self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub lock: LockKind,
    pub producers: usize,
    pub consumers: usize,
    pub readers: usize,
    pub tasks: usize,
    /// Defaults to `tasks` when unset.
    pub expected_writes: Option<usize>,
    /// CSV file backing the sink; an in-memory sink is used when unset.
    pub sink: Option<PathBuf>,
    pub producer_pause_ms: u64,
    pub reader_poll_ms: u64,
    pub log_level: LogLevel,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            lock: LockKind::Exclusive,
            producers: 4,
            consumers: 4,
            readers: 1,
            tasks: 100,
            expected_writes: None,
            sink: None,
            producer_pause_ms: 1,
            reader_poll_ms: 5,
            log_level: LogLevel::Info,
        }
    }
}

impl RunConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tasks > 0 && self.producers == 0 {
            return Err(Error::InvalidConfig(
                "producers must be > 0 when tasks are requested".to_string(),
            ));
        }
        if self.tasks > 0 && self.consumers == 0 {
            return Err(Error::InvalidConfig(
                "consumers must be > 0 when tasks are requested".to_string(),
            ));
        }
        if self.readers > 0 && self.reader_poll_ms == 0 {
            return Err(Error::InvalidConfig("reader_poll_ms must be > 0".to_string()));
        }
        if i64::try_from(self.tasks).is_err() {
            return Err(Error::InvalidConfig(format!("tasks out of range: {}", self.tasks)));
        }
        Ok(())
    }

    pub fn expected_writes(&self) -> usize {
        self.expected_writes.unwrap_or(self.tasks)
    }

    pub fn plan(&self) -> RunPlan {
        RunPlan {
            producer_threads: self.producers,
            produce_count: self.tasks,
            reader_threads: self.readers,
            consumer_threads: self.consumers,
            expected_write_count: self.expected_writes(),
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            producer_pause: Duration::from_millis(self.producer_pause_ms),
            reader_poll: Duration::from_millis(self.reader_poll_ms),
            consumer_idle: DEFAULT_CONSUMER_IDLE,
        }
    }
}
