//! Producer, consumer and reader roles driven against one shared queue.
//!
//! Roles are coordinated through independent atomics: a run-scoped id
//! counter, one stop flag per role, and completion counters. Consumers
//! blocked in `dequeue` are released by poison tasks, one per live consumer.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::{ThreadContext, ThreadHandle, ThreadRegistry};
use crate::sink::{RecordSink, SinkError};
use crate::task_queue::{Dequeued, TaskQueue};
use crate::types::{Task, TaskId};

/// Pause between two tasks minted by one producer.
pub const DEFAULT_PRODUCER_PAUSE: Duration = Duration::from_millis(1);
/// Interval between two reader scans of the sink.
pub const DEFAULT_READER_POLL: Duration = Duration::from_millis(5);
/// Back-off of a consumer that found a non-blocking queue empty.
pub const DEFAULT_CONSUMER_IDLE: Duration = Duration::from_millis(1);

/// Poll and pacing intervals. None of them affect correctness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    pub producer_pause: Duration,
    pub reader_poll: Duration,
    pub consumer_idle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            producer_pause: DEFAULT_PRODUCER_PAUSE,
            reader_poll: DEFAULT_READER_POLL,
            consumer_idle: DEFAULT_CONSUMER_IDLE,
        }
    }
}

/// Thread layout and workload of one orchestrated run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPlan {
    pub producer_threads: usize,
    pub produce_count: usize,
    pub reader_threads: usize,
    pub consumer_threads: usize,
    pub expected_write_count: usize,
}

/// Outcome of the post-run sink verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consistency {
    Verified,
    Missing { expected: usize, found: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub produced: usize,
    pub completed: usize,
    pub failed: usize,
    pub sink_rows: usize,
    pub read_completed: bool,
    pub consistency: Consistency,
}

/// Divide `total` tasks across `producers`, giving the remainder to the first ones.
pub fn split_tasks(total: usize, producers: usize) -> Vec<usize> {
    if producers == 0 {
        return Vec::new();
    }
    let base = total / producers;
    let remainder = total % producers;
    (0..producers)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

/// Completion counters plus a condition variable for the run barriers.
struct Progress {
    completed: AtomicUsize,
    failed: AtomicUsize,
    target: AtomicUsize,
    read_completed: AtomicBool,
    lock: Mutex<()>,
    changed: Condvar,
}

impl Progress {
    fn new() -> Self {
        Self {
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            target: AtomicUsize::new(0),
            read_completed: AtomicBool::new(false),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    fn begin(&self, target: usize) {
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.target.store(target, Ordering::SeqCst);
        self.read_completed.store(false, Ordering::SeqCst);
    }

    fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Every task of the current run has been executed or has failed.
    fn settled(&self) -> bool {
        self.completed() + self.failed() >= self.target.load(Ordering::SeqCst)
    }

    fn read_completed(&self) -> bool {
        self.read_completed.load(Ordering::SeqCst)
    }

    // Counters are updated before the lock is taken, so a waiter that saw
    // the old value is already parked when this notifies.
    fn notify(&self) {
        let _guard = self.lock.lock();
        self.changed.notify_all();
    }

    fn wait_until(&self, mut done: impl FnMut(&Self) -> bool) {
        let mut guard = self.lock.lock();
        while !done(self) {
            self.changed.wait(&mut guard);
        }
    }
}

/// Releases a consumer's live slot however its loop ends.
struct LiveConsumer<'a>(&'a AtomicUsize);

impl Drop for LiveConsumer<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// State shared by the orchestrator and every role thread.
struct Shared {
    queue: Arc<TaskQueue>,
    sink: Arc<dyn RecordSink>,
    pacing: Pacing,
    next_id: AtomicI64,
    produced: AtomicUsize,
    stop_producer: AtomicBool,
    stop_consumer: AtomicBool,
    stop_reader: AtomicBool,
    live_consumers: AtomicUsize,
    progress: Progress,
}

impl Shared {
    /// Record the task through the sink. A panicking sink counts as a
    /// failed write.
    fn execute_task(&self, mut task: Task) -> Result<()> {
        task.completed = true;
        let fields = task.record_fields();
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.append(&fields))) {
            Ok(appended) => appended?,
            Err(_) => {
                return Err(Error::Sink(SinkError::Rejected(format!(
                    "sink panicked while recording task {}",
                    task.id
                ))));
            }
        }
        debug!(task = task.id, name = %task.name, "executed task");
        Ok(())
    }

    fn run_producer(&self, task_count: i64) {
        info!(task_count, "producer started");
        let mut produced = 0usize;
        for _ in 0..task_count {
            if self.stop_producer.load(Ordering::SeqCst) {
                info!(produced, "producer stopping on stop flag");
                return;
            }
            let id: TaskId = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.queue.enqueue(Task::new(id, format!("Task_{id}")));
            self.produced.fetch_add(1, Ordering::SeqCst);
            produced += 1;
            if !self.pacing.producer_pause.is_zero() {
                thread::sleep(self.pacing.producer_pause);
            }
        }
        info!(produced, "producer finished");
    }

    fn run_consumer(&self, ctx: &ThreadContext) {
        info!("consumer started");
        let _live = LiveConsumer(&self.live_consumers);
        let mut executed = 0usize;
        loop {
            match self.queue.dequeue_observed(|| ctx.record_block()) {
                Dequeued::Ready(task) => {
                    let id = task.id;
                    match self.execute_task(task) {
                        Ok(()) => {
                            self.progress.completed.fetch_add(1, Ordering::SeqCst);
                            executed += 1;
                        }
                        Err(err) => {
                            self.progress.failed.fetch_add(1, Ordering::SeqCst);
                            warn!(task = id, error = %err, "failed to record task");
                        }
                    }
                    self.progress.notify();
                }
                Dequeued::Poisoned => {
                    info!(executed, "consumer received termination signal");
                    break;
                }
                Dequeued::Empty => {
                    let stopping = self.stop_producer.load(Ordering::SeqCst)
                        || self.stop_consumer.load(Ordering::SeqCst);
                    if stopping && self.queue.is_empty() {
                        info!(executed, "queue drained and producers stopped");
                        break;
                    }
                    thread::sleep(self.pacing.consumer_idle);
                }
            }
        }
    }

    fn run_reader(&self, ctx: &ThreadContext) {
        info!("reader started");
        loop {
            if ctx.is_cancelled() || self.stop_reader.load(Ordering::SeqCst) {
                info!("reader cancelled");
                return;
            }
            thread::sleep(self.pacing.reader_poll);
            let rows = match self.sink.read_all() {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(error = %err, "reader failed to read sink");
                    continue;
                }
            };
            let completed = self.progress.completed();
            debug!(rows = rows.len(), completed, "reader scanned sink");
            if self.progress.settled() && rows.len() >= completed {
                ctx.finish();
                self.progress.read_completed.store(true, Ordering::SeqCst);
                self.progress.notify();
                info!(rows = rows.len(), "reader observed every completed task");
                return;
            }
        }
    }
}

/// Owns the shared queue, the thread registry and the sink handle for a run.
pub struct Orchestrator {
    shared: Arc<Shared>,
    registry: ThreadRegistry,
    readers: Mutex<Vec<ThreadHandle>>,
    producers_started: AtomicUsize,
    consumers_started: AtomicUsize,
    readers_started: AtomicUsize,
}

impl Orchestrator {
    pub fn new(queue: Arc<TaskQueue>, sink: Arc<dyn RecordSink>) -> Self {
        Self::with_pacing(queue, sink, Pacing::default())
    }

    pub fn with_pacing(queue: Arc<TaskQueue>, sink: Arc<dyn RecordSink>, pacing: Pacing) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                sink,
                pacing,
                next_id: AtomicI64::new(1),
                produced: AtomicUsize::new(0),
                stop_producer: AtomicBool::new(false),
                stop_consumer: AtomicBool::new(false),
                stop_reader: AtomicBool::new(false),
                live_consumers: AtomicUsize::new(0),
                progress: Progress::new(),
            }),
            registry: ThreadRegistry::new(),
            readers: Mutex::new(Vec::new()),
            producers_started: AtomicUsize::new(0),
            consumers_started: AtomicUsize::new(0),
            readers_started: AtomicUsize::new(0),
        }
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.shared.queue
    }

    pub fn sink(&self) -> &Arc<dyn RecordSink> {
        &self.shared.sink
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    pub fn pacing(&self) -> Pacing {
        self.shared.pacing
    }

    pub fn tasks_produced(&self) -> usize {
        self.shared.produced.load(Ordering::SeqCst)
    }

    pub fn tasks_completed(&self) -> usize {
        self.shared.progress.completed()
    }

    pub fn tasks_failed(&self) -> usize {
        self.shared.progress.failed()
    }

    pub fn read_completed(&self) -> bool {
        self.shared.progress.read_completed()
    }

    pub fn live_consumers(&self) -> usize {
        self.shared.live_consumers.load(Ordering::SeqCst)
    }

    /// Restart task ids at 1 for the next run.
    pub fn reset_task_counter(&self) {
        self.shared.next_id.store(1, Ordering::SeqCst);
    }

    /// Spawn a producer that mints `task_count` tasks.
    pub fn start_producer(&self, task_count: i64) -> Result<ThreadHandle> {
        if task_count <= 0 {
            return Err(Error::InvalidTaskCount(task_count));
        }
        self.shared.stop_producer.store(false, Ordering::SeqCst);
        let name = format!("producer-{}", self.producers_started.fetch_add(1, Ordering::SeqCst));
        let shared = Arc::clone(&self.shared);
        self.registry
            .spawn_with(&name, task_count, move |_, count| shared.run_producer(count))
    }

    pub fn stop_producers(&self) {
        self.shared.stop_producer.store(true, Ordering::SeqCst);
        debug!("producer stop flag set");
    }

    pub fn start_consumer(&self) -> Result<ThreadHandle> {
        self.shared.stop_consumer.store(false, Ordering::SeqCst);
        // Counted before spawning so a concurrent stop sees this consumer.
        self.shared.live_consumers.fetch_add(1, Ordering::SeqCst);
        let name = format!("consumer-{}", self.consumers_started.fetch_add(1, Ordering::SeqCst));
        let shared = Arc::clone(&self.shared);
        let spawned = self
            .registry
            .spawn(&name, move |ctx| shared.run_consumer(&ctx));
        if spawned.is_err() {
            self.shared.live_consumers.fetch_sub(1, Ordering::SeqCst);
        }
        spawned
    }

    /// Raise the consumer stop flag and enqueue `count` poison tasks.
    pub fn stop_consumers(&self, count: usize) {
        self.shared.stop_consumer.store(true, Ordering::SeqCst);
        for _ in 0..count {
            self.shared.queue.enqueue(Task::poison());
        }
        info!(count, "termination tasks enqueued");
    }

    pub fn start_reader(&self) -> Result<ThreadHandle> {
        self.shared.stop_reader.store(false, Ordering::SeqCst);
        let name = format!("reader-{}", self.readers_started.fetch_add(1, Ordering::SeqCst));
        let shared = Arc::clone(&self.shared);
        let handle = self.registry.spawn(&name, move |ctx| shared.run_reader(&ctx))?;
        self.readers.lock().push(handle);
        Ok(handle)
    }

    /// Cancel every reader still polling.
    pub fn stop_readers(&self) {
        self.shared.stop_reader.store(true, Ordering::SeqCst);
        let readers = std::mem::take(&mut *self.readers.lock());
        for handle in readers {
            if let Err(err) = self.registry.cancel(handle) {
                warn!(%handle, error = %err, "failed to cancel reader");
            }
        }
        debug!("readers stopped");
    }

    /// Block until every task of the current run has been executed or failed.
    pub fn wait_for_settled(&self) {
        self.shared.progress.wait_until(Progress::settled);
    }

    pub fn wait_for_read_completed(&self) {
        self.shared.progress.wait_until(Progress::read_completed);
    }

    /// Run a complete round: spawn every role, wait for the work to drain,
    /// shut roles down in order and verify the sink.
    pub fn custom_tasks(&self, plan: RunPlan) -> Result<RunSummary> {
        if plan.produce_count > 0 && plan.producer_threads == 0 {
            return Err(Error::InvalidPlan(format!(
                "{} tasks requested with no producer threads",
                plan.produce_count
            )));
        }
        if plan.produce_count > 0 && plan.consumer_threads == 0 {
            return Err(Error::InvalidPlan(format!(
                "{} tasks requested with no consumer threads",
                plan.produce_count
            )));
        }
        info!(
            producers = plan.producer_threads,
            consumers = plan.consumer_threads,
            readers = plan.reader_threads,
            tasks = plan.produce_count,
            lock = %self.shared.queue.lock_kind(),
            "starting run"
        );
        self.shared.produced.store(0, Ordering::SeqCst);
        self.shared.progress.begin(plan.produce_count);

        if let Err(err) = self.spawn_roles(&plan) {
            warn!(error = %err, "aborting run after spawn failure");
            self.shutdown();
            return Err(err);
        }

        self.wait_for_settled();
        self.stop_producers();
        self.stop_consumers(self.live_consumers());
        if plan.reader_threads > 0 {
            self.wait_for_read_completed();
        }
        self.stop_readers();
        self.registry.join_all()?;

        let leftover = self.shared.queue.drain_all();
        if leftover > 0 {
            debug!(leftover, "drained leftover tasks");
        }

        let sink_rows = self.shared.sink.read_all()?.len();
        let consistency = if sink_rows >= plan.expected_write_count {
            info!(sink_rows, "all tasks written to sink");
            Consistency::Verified
        } else {
            warn!(
                expected = plan.expected_write_count,
                found = sink_rows,
                "missing tasks in sink"
            );
            Consistency::Missing {
                expected: plan.expected_write_count,
                found: sink_rows,
            }
        };

        Ok(RunSummary {
            produced: self.tasks_produced(),
            completed: self.tasks_completed(),
            failed: self.tasks_failed(),
            sink_rows,
            read_completed: self.read_completed(),
            consistency,
        })
    }

    fn spawn_roles(&self, plan: &RunPlan) -> Result<()> {
        for (i, share) in split_tasks(plan.produce_count, plan.producer_threads)
            .into_iter()
            .enumerate()
        {
            debug!(producer = i, tasks = share, "assigned producer share");
            if share > 0 {
                self.start_producer(share as i64)?;
            }
        }
        for _ in 0..plan.consumer_threads {
            self.start_consumer()?;
        }
        for _ in 0..plan.reader_threads {
            self.start_reader()?;
        }
        Ok(())
    }

    /// Stop every role and join whatever was spawned.
    fn shutdown(&self) {
        self.stop_producers();
        self.stop_consumers(self.live_consumers());
        self.stop_readers();
        if let Err(err) = self.registry.join_all() {
            warn!(error = %err, "error while joining threads during shutdown");
        }
        self.shared.queue.drain_all();
    }
}
