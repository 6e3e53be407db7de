//! Blocking FIFO task queue guarded by a pluggable [`LockStrategy`].
//!
//! The task sequence lives in a single mutex, and that same mutex is the one
//! handed to the condition variable. A dequeuer checks for emptiness and
//! parks while holding it, so a producer's signal cannot slip in between the
//! check and the wait. The strategy lock is taken before the state mutex and
//! released before parking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::Result;
use crate::lock::{LockKind, LockStrategy};
use crate::metrics::{LatencyStats, QueueMetrics};
use crate::types::Task;

/// Outcome of a single dequeue attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dequeued {
    Ready(Task),
    /// A poison task was consumed; the caller should exit.
    Poisoned,
    /// Nothing queued and the strategy does not block.
    Empty,
}

impl Dequeued {
    pub fn into_task(self) -> Option<Task> {
        match self {
            Self::Ready(task) => Some(task),
            _ => None,
        }
    }
}

/// Lock-free accumulator for per-operation latency.
struct LatencyTracker {
    count: AtomicU64,
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl LatencyTracker {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ns.fetch_add(nanos, Ordering::Relaxed);
        self.min_ns.fetch_min(nanos, Ordering::Relaxed);
        self.max_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatencyStats {
        let count = self.count.load(Ordering::Relaxed);
        let min_ns = self.min_ns.load(Ordering::Relaxed);
        LatencyStats {
            count,
            total: Duration::from_nanos(self.total_ns.load(Ordering::Relaxed)),
            // The identity value stands in for "no samples yet".
            min: if count == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(min_ns)
            },
            max: Duration::from_nanos(self.max_ns.load(Ordering::Relaxed)),
        }
    }
}

/// FIFO queue of tasks shared between producer and consumer threads.
pub struct TaskQueue {
    strategy: LockStrategy,
    tasks: Mutex<VecDeque<Task>>,
    available: Condvar,
    // Mirrors `tasks.len()`; only written while `tasks` is held.
    depth: AtomicUsize,
    max_depth: AtomicUsize,
    blocked_waits: AtomicU64,
    enqueue_latency: LatencyTracker,
    dequeue_latency: LatencyTracker,
}

impl TaskQueue {
    /// Create an empty queue with a fixed locking discipline.
    pub fn new(kind: LockKind) -> Self {
        Self {
            strategy: LockStrategy::new(kind),
            tasks: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            depth: AtomicUsize::new(0),
            max_depth: AtomicUsize::new(0),
            blocked_waits: AtomicU64::new(0),
            enqueue_latency: LatencyTracker::new(),
            dequeue_latency: LatencyTracker::new(),
        }
    }

    /// Create a queue from a textual strategy selector such as `"rwlock"`.
    pub fn from_selector(selector: &str) -> Result<Self> {
        Ok(Self::new(selector.parse()?))
    }

    pub fn lock_kind(&self) -> LockKind {
        self.strategy.kind()
    }

    pub fn strategy(&self) -> &LockStrategy {
        &self.strategy
    }

    /// Append a task and wake one waiting dequeuer.
    pub fn enqueue(&self, task: Task) {
        let start = Instant::now();
        let poison = task.is_poison();
        let id = task.id;
        {
            let _access = self.strategy.acquire_exclusive();
            let mut tasks = self.tasks.lock();
            tasks.push_back(task);
            self.depth.store(tasks.len(), Ordering::Release);
            self.max_depth.fetch_max(tasks.len(), Ordering::Relaxed);
        }
        // Each dequeuer re-checks emptiness, so one wakeup per item suffices.
        self.available.notify_one();
        if !poison {
            self.enqueue_latency.record(start.elapsed());
        }
        debug!(task = id, "enqueued");
    }

    /// Block until a task or a poison pill is at the head of the queue.
    pub fn dequeue(&self) -> Dequeued {
        self.dequeue_observed(|| {})
    }

    /// Like [`TaskQueue::dequeue`], calling `on_block` each time the caller parks.
    pub fn dequeue_observed(&self, mut on_block: impl FnMut()) -> Dequeued {
        let start = Instant::now();
        loop {
            let access = self.strategy.acquire_exclusive();
            let mut tasks = self.tasks.lock();
            if let Some(task) = tasks.pop_front() {
                self.depth.store(tasks.len(), Ordering::Release);
                drop(tasks);
                drop(access);
                if task.is_poison() {
                    debug!("poison task consumed");
                    return Dequeued::Poisoned;
                }
                self.dequeue_latency.record(start.elapsed());
                debug!(task = task.id, "dequeued");
                return Dequeued::Ready(task);
            }
            if !self.strategy.blocks() {
                return Dequeued::Empty;
            }
            // Producers need the strategy lock to push; the state mutex is
            // released atomically by the wait itself.
            drop(access);
            self.blocked_waits.fetch_add(1, Ordering::Relaxed);
            self.available.wait(&mut tasks);
            drop(tasks);
            on_block();
        }
    }

    /// Remove and discard everything queued; returns how many were dropped.
    pub fn drain_all(&self) -> usize {
        let _access = self.strategy.acquire_exclusive();
        let mut tasks = self.tasks.lock();
        let drained = tasks.len();
        tasks.clear();
        self.depth.store(0, Ordering::Release);
        drained
    }

    /// Point-in-time depth; may be stale as soon as it returns.
    pub fn size(&self) -> usize {
        let _access = self.strategy.acquire_shared();
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::Relaxed)
    }

    /// Number of times a dequeuer had to park on an empty queue.
    pub fn blocked_waits(&self) -> u64 {
        self.blocked_waits.load(Ordering::Relaxed)
    }

    pub fn enqueue_count(&self) -> u64 {
        self.enqueue_latency.count.load(Ordering::Relaxed)
    }

    pub fn dequeue_count(&self) -> u64 {
        self.dequeue_latency.count.load(Ordering::Relaxed)
    }

    pub fn enqueue_latency(&self) -> LatencyStats {
        self.enqueue_latency.snapshot()
    }

    pub fn dequeue_latency(&self) -> LatencyStats {
        self.dequeue_latency.snapshot()
    }

    pub fn contention_count(&self) -> Option<u64> {
        self.strategy.contention_count()
    }

    pub fn read_contention_count(&self) -> Option<u64> {
        self.strategy.read_contention_count()
    }

    pub fn write_contention_count(&self) -> Option<u64> {
        self.strategy.write_contention_count()
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            lock: self.lock_kind(),
            enqueue: self.enqueue_latency(),
            dequeue: self.dequeue_latency(),
            max_depth: self.max_depth(),
            blocked_waits: self.blocked_waits(),
            contention: self.contention_count(),
            read_contention: self.read_contention_count(),
            write_contention: self.write_contention_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn task(id: i64) -> Task {
        Task::new(id, format!("Task_{id}"))
    }

    #[test]
    fn dequeue_preserves_fifo_order() {
        for kind in LockKind::ALL {
            let queue = TaskQueue::new(kind);
            for id in 1..=20 {
                queue.enqueue(task(id));
            }
            let order: Vec<i64> = (0..20)
                .map(|_| queue.dequeue().into_task().expect("task").id)
                .collect();
            assert_eq!(order, (1..=20).collect::<Vec<_>>(), "{kind}");
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn poison_is_consumed_and_never_returned() {
        let queue = TaskQueue::new(LockKind::Exclusive);
        queue.enqueue(task(1));
        queue.enqueue(Task::poison());
        queue.enqueue(task(2));

        assert_eq!(queue.dequeue(), Dequeued::Ready(task(1)));
        assert_eq!(queue.dequeue(), Dequeued::Poisoned);
        assert_eq!(queue.dequeue(), Dequeued::Ready(task(2)));
        assert_eq!(queue.enqueue_count(), 2);
        assert_eq!(queue.dequeue_count(), 2);
    }

    #[test]
    fn concurrent_backlog_is_split_without_duplicates() {
        for kind in [LockKind::Exclusive, LockKind::ReaderWriter] {
            let queue = Arc::new(TaskQueue::new(kind));
            let producers = 3;
            let per_producer = 40;
            let consumers = 4;
            let start = Arc::new(Barrier::new(producers + consumers));

            let mut consumer_threads = Vec::new();
            for _ in 0..consumers {
                let queue = Arc::clone(&queue);
                let start = Arc::clone(&start);
                consumer_threads.push(thread::spawn(move || {
                    start.wait();
                    let mut ids = Vec::new();
                    while let Dequeued::Ready(task) = queue.dequeue() {
                        ids.push(task.id);
                    }
                    ids
                }));
            }
            let mut producer_threads = Vec::new();
            for p in 0..producers {
                let queue = Arc::clone(&queue);
                let start = Arc::clone(&start);
                producer_threads.push(thread::spawn(move || {
                    start.wait();
                    for i in 0..per_producer {
                        queue.enqueue(task((p * per_producer + i + 1) as i64));
                    }
                }));
            }
            for handle in producer_threads {
                handle.join().expect("producer panicked");
            }
            // Poison queues behind the backlog, so no consumer leaves early.
            for _ in 0..consumers {
                queue.enqueue(Task::poison());
            }

            let mut ids: Vec<i64> = consumer_threads
                .into_iter()
                .flat_map(|handle| handle.join().expect("consumer panicked"))
                .collect();
            ids.sort_unstable();
            let total = (producers * per_producer) as i64;
            assert_eq!(ids, (1..=total).collect::<Vec<_>>(), "{kind}");
            assert_eq!(queue.enqueue_count(), total as u64);
            assert_eq!(queue.dequeue_count(), total as u64);
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn dequeue_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueue::new(LockKind::Exclusive));
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let queue_clone = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            ready_tx.send(()).expect("send ready");
            let mut parks = 0;
            let task = queue_clone
                .dequeue_observed(|| parks += 1)
                .into_task()
                .expect("task");
            tx.send((task.id, parks)).expect("send task id");
        });

        ready_rx.recv_timeout(Duration::from_secs(1)).expect("ready");
        thread::sleep(Duration::from_millis(30));
        // Pushing after the consumer blocks should wake it.
        queue.enqueue(task(99));

        let (received, parks) = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("receive task id");
        assert_eq!(received, 99);
        assert!(parks >= 1);
        assert!(queue.blocked_waits() >= 1);
        handle.join().expect("blocking dequeue thread panicked");
    }

    #[test]
    fn parked_consumers_split_tasks_and_poison() {
        let queue = Arc::new(TaskQueue::new(LockKind::ReaderWriter));
        let consumers = 4;
        let (outcome_tx, outcome_rx) = mpsc::channel();

        let mut handles = Vec::new();
        for _ in 0..consumers {
            let queue = Arc::clone(&queue);
            let outcome_tx = outcome_tx.clone();
            handles.push(thread::spawn(move || {
                outcome_tx.send(queue.dequeue()).expect("send outcome");
            }));
        }

        // A waiter is counted while it still holds the state mutex, so once
        // every consumer is counted each one is parked or about to park.
        let deadline = Instant::now() + Duration::from_secs(1);
        while queue.blocked_waits() < consumers as u64 {
            assert!(Instant::now() < deadline, "consumers never parked");
            thread::sleep(Duration::from_millis(1));
        }

        queue.enqueue(task(1));
        queue.enqueue(Task::poison());
        queue.enqueue(task(2));
        queue.enqueue(Task::poison());

        let mut ready = Vec::new();
        let mut poisoned = 0;
        for _ in 0..consumers {
            match outcome_rx
                .recv_timeout(Duration::from_secs(1))
                .expect("consumer released")
            {
                Dequeued::Ready(task) => ready.push(task.id),
                Dequeued::Poisoned => poisoned += 1,
                Dequeued::Empty => panic!("blocking strategy returned Empty"),
            }
        }
        for handle in handles {
            handle.join().expect("consumer panicked");
        }

        ready.sort_unstable();
        assert_eq!(ready, vec![1, 2]);
        assert_eq!(poisoned, 2);
        assert_eq!(queue.dequeue_count(), 2);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn each_poison_releases_one_blocked_consumer() {
        let queue = Arc::new(TaskQueue::new(LockKind::Exclusive));
        let consumers = 3;
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let mut handles = Vec::new();
        for _ in 0..consumers {
            let queue = Arc::clone(&queue);
            let ready_tx = ready_tx.clone();
            let done_tx = done_tx.clone();
            handles.push(thread::spawn(move || {
                ready_tx.send(()).expect("ready");
                done_tx.send(queue.dequeue()).expect("done");
            }));
        }
        for _ in 0..consumers {
            ready_rx.recv_timeout(Duration::from_secs(1)).expect("ready recv");
        }

        queue.enqueue(Task::poison());
        queue.enqueue(Task::poison());
        for _ in 0..2 {
            let outcome = done_rx.recv_timeout(Duration::from_secs(1)).expect("released");
            assert_eq!(outcome, Dequeued::Poisoned);
        }
        // Two pills release exactly two consumers.
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

        queue.enqueue(Task::poison());
        let outcome = done_rx.recv_timeout(Duration::from_secs(1)).expect("released");
        assert_eq!(outcome, Dequeued::Poisoned);
        for handle in handles {
            handle.join().expect("consumer thread panicked");
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn unsynchronized_dequeue_never_blocks() {
        let queue = TaskQueue::new(LockKind::NoLock);
        let start = Instant::now();
        assert_eq!(queue.dequeue(), Dequeued::Empty);
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(queue.blocked_waits(), 0);
    }

    #[test]
    fn drain_all_empties_queue() {
        let queue = TaskQueue::new(LockKind::Exclusive);
        for id in 1..=5 {
            queue.enqueue(task(id));
        }
        queue.enqueue(Task::poison());
        assert_eq!(queue.size(), 6);
        assert_eq!(queue.drain_all(), 6);
        assert!(queue.is_empty());
        assert_eq!(queue.max_depth(), 6);
    }

    #[test]
    fn latency_and_depth_are_tracked() {
        let queue = TaskQueue::new(LockKind::ReaderWriter);
        let fresh = queue.metrics();
        assert_eq!(fresh.enqueue.count, 0);
        assert_eq!(fresh.enqueue.min, Duration::ZERO);
        assert_eq!(fresh.enqueue.average(), Duration::ZERO);

        for id in 1..=3 {
            queue.enqueue(task(id));
        }
        queue.dequeue();

        let metrics = queue.metrics();
        assert_eq!(metrics.lock, LockKind::ReaderWriter);
        assert_eq!(metrics.enqueue.count, 3);
        assert_eq!(metrics.dequeue.count, 1);
        assert!(metrics.enqueue.min <= metrics.enqueue.max);
        assert!(metrics.enqueue.total >= metrics.enqueue.max);
        assert_eq!(metrics.max_depth, 3);
        assert_eq!(metrics.contention, None);
        assert!(metrics.read_contention.is_some());
        assert!(metrics.write_contention.is_some());
    }

    #[test]
    fn selector_builds_matching_queue() {
        let queue = TaskQueue::from_selector("mutex").expect("known selector");
        assert_eq!(queue.lock_kind(), LockKind::Exclusive);
        assert_eq!(queue.contention_count(), Some(0));
        assert!(TaskQueue::from_selector("spin").is_err());
    }
}
