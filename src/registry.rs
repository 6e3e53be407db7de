//! Lifecycle tracking and per-thread metrics for spawned native threads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::metrics::ThreadMetrics;

/// Registry-assigned identifier of a tracked thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadHandle(u64);

impl ThreadHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    Finished,
    Detached,
    Cancelled,
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Running => "Running",
            Self::Finished => "Finished",
            Self::Detached => "Detached",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

struct ThreadRecord {
    name: String,
    status: ThreadStatus,
    runtime: Duration,
    block_count: u64,
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

struct RegistryState {
    records: HashMap<ThreadHandle, ThreadRecord>,
    // Threads still owed a join, in spawn order.
    tracked: Vec<ThreadHandle>,
}

struct Shared {
    state: Mutex<RegistryState>,
    next_id: AtomicU64,
}

impl Shared {
    fn with_record<R>(
        &self,
        handle: ThreadHandle,
        f: impl FnOnce(&mut ThreadRecord) -> R,
    ) -> Result<R> {
        let mut guard = self.state.lock();
        let record = guard.records.get_mut(&handle).ok_or(Error::UnknownThread(handle))?;
        Ok(f(record))
    }

    /// Mark a thread whose entry point returned; terminal statuses other
    /// than Running stick.
    fn mark_finished(&self, handle: ThreadHandle) {
        let _ = self.with_record(handle, |record| {
            if record.status == ThreadStatus::Running {
                record.status = ThreadStatus::Finished;
            }
        });
    }
}

/// Handed to every entry point so the thread can observe cancellation and
/// feed its own benchmarking data back to the registry.
#[derive(Clone)]
pub struct ThreadContext {
    handle: ThreadHandle,
    cancel: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl ThreadContext {
    pub fn handle(&self) -> ThreadHandle {
        self.handle
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn record_block(&self) {
        let _ = self.shared.with_record(self.handle, |record| record.block_count += 1);
    }

    pub fn record_runtime(&self, duration: Duration) {
        let _ = self.shared.with_record(self.handle, |record| record.runtime += duration);
    }

    /// Report that this thread stopped on its own. A later cancel no longer
    /// changes its status.
    pub fn finish(&self) {
        self.shared.mark_finished(self.handle);
    }
}

/// Thread-safe registry of spawned threads.
pub struct ThreadRegistry {
    shared: Arc<Shared>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState {
                    records: HashMap::new(),
                    tracked: Vec::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Spawn a named thread that takes no argument.
    pub fn spawn<F>(&self, name: &str, entry: F) -> Result<ThreadHandle>
    where
        F: FnOnce(ThreadContext) + Send + 'static,
    {
        self.spawn_with(name, 0, move |ctx, _| entry(ctx))
    }

    /// Spawn a named thread with an integer argument.
    ///
    /// Negative arguments are rejected before any thread is created.
    pub fn spawn_with<F>(&self, name: &str, arg: i64, entry: F) -> Result<ThreadHandle>
    where
        F: FnOnce(ThreadContext, i64) + Send + 'static,
    {
        if arg < 0 {
            return Err(Error::InvalidSpawnArgument(arg));
        }

        let handle = ThreadHandle(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = Arc::new(AtomicBool::new(false));
        // Registered before start so the thread can record against itself.
        self.shared.state.lock().records.insert(
            handle,
            ThreadRecord {
                name: name.to_string(),
                status: ThreadStatus::Running,
                runtime: Duration::ZERO,
                block_count: 0,
                cancel: Arc::clone(&cancel),
                join: None,
            },
        );

        let ctx = ThreadContext {
            handle,
            cancel,
            shared: Arc::clone(&self.shared),
        };
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            let start = Instant::now();
            entry(ctx.clone(), arg);
            ctx.record_runtime(start.elapsed());
            ctx.finish();
        });

        let mut guard = self.shared.state.lock();
        match spawned {
            Ok(join) => {
                if let Some(record) = guard.records.get_mut(&handle) {
                    record.join = Some(join);
                }
                guard.tracked.push(handle);
                debug!(%handle, name, "thread spawned");
                Ok(handle)
            }
            Err(source) => {
                guard.records.remove(&handle);
                Err(Error::Spawn {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Wait for one thread to terminate.
    pub fn join(&self, handle: ThreadHandle) -> Result<()> {
        let join = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let record = state.records.get_mut(&handle).ok_or(Error::UnknownThread(handle))?;
            state.tracked.retain(|tracked| *tracked != handle);
            record.join.take()
        };
        let Some(join) = join else {
            return Ok(());
        };
        let outcome = join.join();
        self.shared.mark_finished(handle);
        outcome.map_err(|_| {
            error!(%handle, "thread panicked");
            Error::ThreadPanicked(handle)
        })
    }

    /// Join every tracked thread, then clear the tracked set.
    ///
    /// All threads are joined even if some panicked; the first panic is
    /// reported afterwards.
    pub fn join_all(&self) -> Result<()> {
        let pending: Vec<(ThreadHandle, Option<JoinHandle<()>>)> = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let tracked = std::mem::take(&mut state.tracked);
            tracked
                .into_iter()
                .map(|handle| {
                    let join = state.records.get_mut(&handle).and_then(|r| r.join.take());
                    (handle, join)
                })
                .collect()
        };

        let mut first_panic = None;
        for (handle, join) in pending {
            let Some(join) = join else { continue };
            debug!(%handle, "waiting for thread");
            if join.join().is_err() {
                error!(%handle, "thread panicked");
                first_panic.get_or_insert(handle);
            }
            self.shared.mark_finished(handle);
        }
        match first_panic {
            Some(handle) => Err(Error::ThreadPanicked(handle)),
            None => Ok(()),
        }
    }

    /// Stop tracking a thread; it keeps running unobserved.
    pub fn detach(&self, handle: ThreadHandle) -> Result<()> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let record = state.records.get_mut(&handle).ok_or(Error::UnknownThread(handle))?;
        record.join.take();
        record.status = ThreadStatus::Detached;
        state.tracked.retain(|tracked| *tracked != handle);
        Ok(())
    }

    /// Request cooperative cancellation; the thread is still joined later.
    pub fn cancel(&self, handle: ThreadHandle) -> Result<()> {
        self.shared.with_record(handle, |record| {
            record.cancel.store(true, Ordering::Release);
            if record.status == ThreadStatus::Running {
                record.status = ThreadStatus::Cancelled;
            }
        })
    }

    pub fn status(&self, handle: ThreadHandle) -> Result<ThreadStatus> {
        self.shared.with_record(handle, |record| record.status)
    }

    pub fn statuses(&self) -> Vec<(ThreadHandle, ThreadStatus)> {
        let guard = self.shared.state.lock();
        let mut statuses: Vec<_> = guard
            .records
            .iter()
            .map(|(handle, record)| (*handle, record.status))
            .collect();
        statuses.sort_by_key(|(handle, _)| *handle);
        statuses
    }

    pub fn record_runtime(&self, handle: ThreadHandle, duration: Duration) -> Result<()> {
        self.shared.with_record(handle, |record| record.runtime += duration)
    }

    pub fn increment_block_count(&self, handle: ThreadHandle) -> Result<()> {
        self.shared.with_record(handle, |record| record.block_count += 1)
    }

    /// Threads spawned but not yet joined or detached.
    pub fn tracked(&self) -> usize {
        self.shared.state.lock().tracked.len()
    }

    pub fn thread_metrics(&self) -> Vec<ThreadMetrics> {
        let guard = self.shared.state.lock();
        let mut metrics: Vec<_> = guard
            .records
            .iter()
            .map(|(handle, record)| ThreadMetrics {
                handle: *handle,
                name: record.name.clone(),
                status: record.status,
                runtime: record.runtime,
                block_count: record.block_count,
            })
            .collect();
        metrics.sort_by_key(|m| m.handle);
        metrics
    }
}
