//! Locking strategies, a blocking task queue built on them, and an
//! orchestrator that runs producer, consumer and reader threads against
//! that queue while measuring latency and lock contention.

pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod sink;
pub mod task_queue;
pub mod types;

pub use error::{Error, Result};
pub use lock::{LockKind, LockStrategy};
pub use orchestrator::{Consistency, Orchestrator, Pacing, RunPlan, RunSummary};
pub use registry::{ThreadHandle, ThreadRegistry, ThreadStatus};
pub use sink::{CsvSink, MemorySink, RecordSink, SinkError};
pub use task_queue::{Dequeued, TaskQueue};
pub use types::{POISON_ID, Task, TaskId};
