//! Demo and configured run entry points used by the CLI.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::config::RunConfig;
use crate::error::Result;
use crate::lock::LockKind;
use crate::metrics::{RunReport, cpu_times_seconds};
use crate::orchestrator::Orchestrator;
use crate::sink::{CsvSink, MemorySink, RecordSink};
use crate::task_queue::TaskQueue;

/// Small reader/writer run with every role active.
pub fn demo_config() -> RunConfig {
    RunConfig {
        lock: LockKind::ReaderWriter,
        producers: 3,
        consumers: 2,
        readers: 1,
        tasks: 12,
        producer_pause_ms: 5,
        reader_poll_ms: 5,
        ..RunConfig::default()
    }
}

fn open_sink(config: &RunConfig) -> Result<Arc<dyn RecordSink>> {
    match &config.sink {
        Some(path) => {
            let sink = CsvSink::open(path)?;
            // Verification counts rows, so start from an empty file.
            sink.clear()?;
            info!(path = %path.display(), "recording to csv sink");
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(MemorySink::new())),
    }
}

/// Validate `config`, run one orchestrated round and collect its report.
pub fn execute(config: &RunConfig) -> Result<RunReport> {
    config.validate()?;
    let sink = open_sink(config)?;
    let queue = Arc::new(TaskQueue::new(config.lock));
    let orchestrator = Orchestrator::with_pacing(queue, sink, config.pacing());

    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    let summary = orchestrator.custom_tasks(config.plan())?;
    let elapsed = start.elapsed();

    Ok(RunReport::new(
        summary,
        orchestrator.queue().metrics(),
        orchestrator.registry().thread_metrics(),
        elapsed,
        cpu_start,
        cpu_times_seconds(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::orchestrator::Consistency;
    use crate::registry::ThreadStatus;

    #[test]
    fn demo_run_is_consistent() {
        let report = execute(&demo_config()).expect("demo run");
        assert_eq!(report.summary.completed, 12);
        assert_eq!(report.summary.consistency, Consistency::Verified);
        assert!(report.summary.read_completed);
        // 3 producers, 2 consumers and 1 reader.
        assert_eq!(report.threads.len(), 6);
        // Every role, the single reader included, stops on its own.
        assert!(report.threads.iter().all(|t| t.status == ThreadStatus::Finished));
    }

    #[test]
    fn csv_sink_holds_every_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("records.csv");
        std::fs::write(&path, "stale,row,Complete\n").expect("seed");
        let config = RunConfig {
            tasks: 20,
            producers: 2,
            consumers: 2,
            readers: 1,
            producer_pause_ms: 0,
            reader_poll_ms: 1,
            sink: Some(path.clone()),
            ..RunConfig::default()
        };
        let report = execute(&config).expect("run");
        assert_eq!(report.summary.sink_rows, 20);
        let rows = CsvSink::open(&path).expect("reopen").read_all().expect("read");
        assert_eq!(rows.len(), 20);
    }

    #[test]
    fn invalid_config_is_rejected_before_running() {
        let config = RunConfig {
            consumers: 0,
            ..RunConfig::default()
        };
        assert!(matches!(execute(&config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn every_lock_kind_completes() {
        for lock in LockKind::ALL {
            let config = RunConfig {
                lock,
                producers: 2,
                consumers: 2,
                readers: 1,
                tasks: 16,
                producer_pause_ms: 0,
                reader_poll_ms: 1,
                ..RunConfig::default()
            };
            let report = execute(&config).expect("run");
            assert_eq!(report.summary.completed, 16, "{lock}");
            assert_eq!(report.queue.lock, lock);
            assert_eq!(report.queue.enqueue.count, 16);
            assert_eq!(report.queue.dequeue.count, 16);
        }
    }
}
