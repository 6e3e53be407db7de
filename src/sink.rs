//! Record sinks that durably store executed tasks.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sink CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    /// Sink refused the write for a reason of its own.
    #[error("sink rejected write: {0}")]
    Rejected(String),
}

/// Append-only row store shared by consumers and readers.
pub trait RecordSink: Send + Sync {
    /// Append one row.
    fn append(&self, fields: &[String]) -> Result<(), SinkError>;

    /// Every stored row, in append order.
    fn read_all(&self) -> Result<Vec<Vec<String>>, SinkError>;

    /// Remove all rows.
    fn clear(&self) -> Result<(), SinkError>;
}

/// In-process sink used by the demo and tests.
#[derive(Default)]
pub struct MemorySink {
    rows: RwLock<Vec<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    fn append(&self, fields: &[String]) -> Result<(), SinkError> {
        self.rows.write().push(fields.to_vec());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Vec<String>>, SinkError> {
        Ok(self.rows.read().clone())
    }

    fn clear(&self) -> Result<(), SinkError> {
        self.rows.write().clear();
        Ok(())
    }
}

/// CSV file opened in append mode; the file is created if missing.
pub struct CsvSink {
    path: PathBuf,
    // Serializes appends and truncation; reads open their own handle.
    write_lock: Mutex<()>,
}

impl CsvSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "csv sink ready");
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RecordSink for CsvSink {
    fn append(&self, fields: &[String]) -> Result<(), SinkError> {
        let _guard = self.write_lock.lock();
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(fields)?;
        writer.flush().map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Vec<String>>, SinkError> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    fn clear(&self) -> Result<(), SinkError> {
        let _guard = self.write_lock.lock();
        File::create(&self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}
