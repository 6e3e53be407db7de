//! Interchangeable locking strategies with contention accounting.
//!
//! Every acquisition first tries the non-blocking path; when that fails the
//! matching contention counter is bumped before falling back to a blocking
//! acquire. Counters can be reset between benchmark rounds without
//! rebuilding the lock.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Deserialize;

use crate::error::Error;

/// Selector for the synchronization discipline of a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LockKind {
    /// Mutual exclusion for every access.
    #[default]
    Exclusive,
    /// Shared reads, exclusive writes.
    ReaderWriter,
    /// No synchronization; the caller guarantees a single mutator.
    NoLock,
}

impl LockKind {
    pub const ALL: [LockKind; 3] = [LockKind::Exclusive, LockKind::ReaderWriter, LockKind::NoLock];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::ReaderWriter => "reader-writer",
            Self::NoLock => "none",
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exclusive" | "mutex" => Ok(Self::Exclusive),
            "reader-writer" | "readerwriter" | "rwlock" | "rw" => Ok(Self::ReaderWriter),
            "none" | "nolock" => Ok(Self::NoLock),
            _ => Err(Error::UnknownLockKind(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for LockKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Mutex that counts acquisitions which could not be satisfied immediately.
#[derive(Default)]
pub struct ExclusiveLock {
    mutex: Mutex<()>,
    contention: AtomicU64,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        if let Some(guard) = self.mutex.try_lock() {
            return guard;
        }
        self.contention.fetch_add(1, Ordering::Relaxed);
        self.mutex.lock()
    }

    pub fn contention_count(&self) -> u64 {
        self.contention.load(Ordering::Relaxed)
    }

    /// Zero the counter, returning the value it held.
    pub fn reset_contention_count(&self) -> u64 {
        self.contention.swap(0, Ordering::Relaxed)
    }
}

/// Reader/writer lock with separate read- and write-contention counters.
#[derive(Default)]
pub struct ReaderWriterLock {
    rwlock: RwLock<()>,
    read_contention: AtomicU64,
    write_contention: AtomicU64,
}

impl ReaderWriterLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access; counts a contention when a writer holds the lock.
    pub fn read(&self) -> RwLockReadGuard<'_, ()> {
        if let Some(guard) = self.rwlock.try_read() {
            return guard;
        }
        self.read_contention.fetch_add(1, Ordering::Relaxed);
        self.rwlock.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ()> {
        if let Some(guard) = self.rwlock.try_write() {
            return guard;
        }
        self.write_contention.fetch_add(1, Ordering::Relaxed);
        self.rwlock.write()
    }

    pub fn read_contention_count(&self) -> u64 {
        self.read_contention.load(Ordering::Relaxed)
    }

    pub fn write_contention_count(&self) -> u64 {
        self.write_contention.load(Ordering::Relaxed)
    }

    pub fn reset_read_contention_count(&self) -> u64 {
        self.read_contention.swap(0, Ordering::Relaxed)
    }

    pub fn reset_write_contention_count(&self) -> u64 {
        self.write_contention.swap(0, Ordering::Relaxed)
    }
}

/// Held access from a [`LockStrategy`]; dropping it releases the lock.
#[must_use = "access is released as soon as the guard is dropped"]
pub enum LockGuard<'a> {
    Exclusive { _guard: MutexGuard<'a, ()> },
    Shared { _guard: RwLockReadGuard<'a, ()> },
    Write { _guard: RwLockWriteGuard<'a, ()> },
    Unsynchronized,
}

/// Closed set of locking disciplines, fixed at construction.
pub enum LockStrategy {
    Exclusive(ExclusiveLock),
    ReaderWriter(ReaderWriterLock),
    NoLock,
}

impl LockStrategy {
    pub fn new(kind: LockKind) -> Self {
        match kind {
            LockKind::Exclusive => Self::Exclusive(ExclusiveLock::new()),
            LockKind::ReaderWriter => Self::ReaderWriter(ReaderWriterLock::new()),
            LockKind::NoLock => Self::NoLock,
        }
    }

    pub fn kind(&self) -> LockKind {
        match self {
            Self::Exclusive(_) => LockKind::Exclusive,
            Self::ReaderWriter(_) => LockKind::ReaderWriter,
            Self::NoLock => LockKind::NoLock,
        }
    }

    /// Whether waiters may block under this discipline.
    pub fn blocks(&self) -> bool {
        !matches!(self, Self::NoLock)
    }

    pub fn acquire_exclusive(&self) -> LockGuard<'_> {
        match self {
            Self::Exclusive(lock) => LockGuard::Exclusive { _guard: lock.lock() },
            Self::ReaderWriter(lock) => LockGuard::Write { _guard: lock.write() },
            Self::NoLock => LockGuard::Unsynchronized,
        }
    }

    /// Shared access; aliases exclusive access under [`LockKind::Exclusive`].
    pub fn acquire_shared(&self) -> LockGuard<'_> {
        match self {
            Self::Exclusive(lock) => LockGuard::Exclusive { _guard: lock.lock() },
            Self::ReaderWriter(lock) => LockGuard::Shared { _guard: lock.read() },
            Self::NoLock => LockGuard::Unsynchronized,
        }
    }

    pub fn contention_count(&self) -> Option<u64> {
        match self {
            Self::Exclusive(lock) => Some(lock.contention_count()),
            _ => None,
        }
    }

    pub fn read_contention_count(&self) -> Option<u64> {
        match self {
            Self::ReaderWriter(lock) => Some(lock.read_contention_count()),
            _ => None,
        }
    }

    pub fn write_contention_count(&self) -> Option<u64> {
        match self {
            Self::ReaderWriter(lock) => Some(lock.write_contention_count()),
            _ => None,
        }
    }

    pub fn reset_contention_count(&self) -> Option<u64> {
        match self {
            Self::Exclusive(lock) => Some(lock.reset_contention_count()),
            _ => None,
        }
    }

    pub fn reset_read_contention_count(&self) -> Option<u64> {
        match self {
            Self::ReaderWriter(lock) => Some(lock.reset_read_contention_count()),
            _ => None,
        }
    }

    pub fn reset_write_contention_count(&self) -> Option<u64> {
        match self {
            Self::ReaderWriter(lock) => Some(lock.reset_write_contention_count()),
            _ => None,
        }
    }
}
