//! Pull-based metric snapshots and the end-of-run report.

use std::fmt;
use std::time::Duration;

use crate::lock::LockKind;
use crate::orchestrator::{Consistency, RunSummary};
use crate::registry::{ThreadHandle, ThreadStatus};

/// Aggregated latency of one queue operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl LatencyStats {
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

/// Snapshot of a task queue's counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueMetrics {
    pub lock: LockKind,
    pub enqueue: LatencyStats,
    pub dequeue: LatencyStats,
    /// High-water mark of queue depth.
    pub max_depth: usize,
    pub blocked_waits: u64,
    /// Exclusive-variant contention; absent for other strategies.
    pub contention: Option<u64>,
    pub read_contention: Option<u64>,
    pub write_contention: Option<u64>,
}

/// Per-thread benchmarking data kept by the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMetrics {
    pub handle: ThreadHandle,
    pub name: String,
    pub status: ThreadStatus,
    pub runtime: Duration,
    pub block_count: u64,
}

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
pub fn cpu_times_seconds() -> Option<(f64, f64)> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    let usage = unsafe { usage.assume_init() };
    let user = usage.ru_utime.tv_sec as f64 + (usage.ru_utime.tv_usec as f64 / 1_000_000.0);
    let sys = usage.ru_stime.tv_sec as f64 + (usage.ru_stime.tv_usec as f64 / 1_000_000.0);
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
pub fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Everything a reporting collaborator needs after one orchestrated run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub queue: QueueMetrics,
    pub threads: Vec<ThreadMetrics>,
    pub elapsed: Duration,
    pub cpu_user_s: Option<f64>,
    pub cpu_sys_s: Option<f64>,
}

impl RunReport {
    /// Build a report, turning two CPU snapshots into a delta.
    pub fn new(
        summary: RunSummary,
        queue: QueueMetrics,
        threads: Vec<ThreadMetrics>,
        elapsed: Duration,
        cpu_start: Option<(f64, f64)>,
        cpu_end: Option<(f64, f64)>,
    ) -> Self {
        let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_end) {
            (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
                (Some(user_end - user_start), Some(sys_end - sys_start))
            }
            _ => (None, None),
        };
        Self {
            summary,
            queue,
            threads,
            elapsed,
            cpu_user_s,
            cpu_sys_s,
        }
    }

    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.summary.completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Total blocked waits recorded against tracked threads.
    pub fn thread_blocks(&self) -> u64 {
        self.threads.iter().map(|t| t.block_count).sum()
    }
}

fn optional<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "NA".to_string())
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = &self.summary;
        let queue = &self.queue;
        writeln!(f, "RUN SUMMARY")?;
        writeln!(f, "lock={}", queue.lock)?;
        writeln!(
            f,
            "produced={} completed={} failed={} sink_rows={}",
            summary.produced, summary.completed, summary.failed, summary.sink_rows
        )?;
        writeln!(f, "read_completed={}", summary.read_completed)?;
        match summary.consistency {
            Consistency::Verified => writeln!(f, "consistency=verified")?,
            Consistency::Missing { expected, found } => {
                writeln!(f, "consistency=missing expected={expected} found={found}")?
            }
        }
        writeln!(f, "elapsed_ms={:.2}", self.elapsed.as_secs_f64() * 1000.0)?;
        writeln!(f, "throughput_tasks_per_s={:.2}", self.throughput())?;
        writeln!(
            f,
            "enqueue_us avg={} min={} max={}",
            queue.enqueue.average().as_micros(),
            queue.enqueue.min.as_micros(),
            queue.enqueue.max.as_micros()
        )?;
        writeln!(
            f,
            "dequeue_us avg={} min={} max={}",
            queue.dequeue.average().as_micros(),
            queue.dequeue.min.as_micros(),
            queue.dequeue.max.as_micros()
        )?;
        writeln!(f, "max_queue_depth={}", queue.max_depth)?;
        writeln!(f, "blocked_waits={}", queue.blocked_waits)?;
        writeln!(
            f,
            "contention={} read_contention={} write_contention={}",
            optional(queue.contention),
            optional(queue.read_contention),
            optional(queue.write_contention)
        )?;
        writeln!(
            f,
            "cpu_user_s={} cpu_sys_s={}",
            optional(self.cpu_user_s.map(|v| format!("{v:.4}"))),
            optional(self.cpu_sys_s.map(|v| format!("{v:.4}")))
        )?;
        writeln!(f, "threads={} thread_blocks={}", self.threads.len(), self.thread_blocks())?;
        for thread in &self.threads {
            writeln!(
                f,
                "thread {} name={} status={} runtime_us={} blocks={}",
                thread.handle,
                thread.name,
                thread.status,
                thread.runtime.as_micros(),
                thread.block_count
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_of_empty_stats_is_zero() {
        assert_eq!(LatencyStats::default().average(), Duration::ZERO);
    }

    #[test]
    fn average_divides_total_by_count() {
        let stats = LatencyStats {
            count: 4,
            total: Duration::from_micros(100),
            min: Duration::from_micros(10),
            max: Duration::from_micros(40),
        };
        assert_eq!(stats.average(), Duration::from_micros(25));
    }

    #[cfg(unix)]
    #[test]
    fn cpu_times_are_available_on_unix() {
        let (user, sys) = cpu_times_seconds().expect("getrusage");
        assert!(user >= 0.0 && sys >= 0.0);
    }

    #[test]
    fn report_renders_consistency_gap() {
        let summary = RunSummary {
            produced: 5,
            completed: 5,
            failed: 0,
            sink_rows: 3,
            read_completed: true,
            consistency: Consistency::Missing { expected: 5, found: 3 },
        };
        let queue = crate::task_queue::TaskQueue::new(LockKind::Exclusive).metrics();
        let elapsed = Duration::from_millis(10);
        let report = RunReport::new(summary, queue, Vec::new(), elapsed, None, None);
        let text = report.to_string();
        assert!(text.starts_with("RUN SUMMARY"));
        assert!(text.contains("consistency=missing expected=5 found=3"));
        assert!(text.contains("contention=0 read_contention=NA"));
        assert!(text.contains("cpu_user_s=NA"));
    }
}
