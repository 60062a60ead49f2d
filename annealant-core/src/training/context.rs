//! Per-run context: identity, clocks, persistence sinks, and cancellation.
//!
//! Created at run start and consumed by [`RunContext::finish`]. Persistence
//! failures are absorbed here: they are logged, reported, and counted, and
//! the run carries on from in-memory state.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::training::checkpoint::{CheckpointDescriptor, CheckpointStore};
use crate::training::experiment::RunSummary;
use crate::training::metrics::EpochResult;
use crate::training::reporter::{RunEvent, RunReporter};
use crate::training::snapshot::Snapshot;

pub struct RunContext<M, O> {
    run_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    store: Box<dyn CheckpointStore<M, O>>,
    reporter: Box<dyn RunReporter>,
    cancel: CancellationToken,
    storage_failures: usize,
}

impl<M, O> RunContext<M, O> {
    pub fn new(
        run_id: impl Into<String>,
        store: Box<dyn CheckpointStore<M, O>>,
        reporter: Box<dyn RunReporter>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            store,
            reporter,
            cancel: CancellationToken::new(),
            storage_failures: 0,
        }
    }

    /// Fresh random run id; also names the run's checkpoint directory.
    pub fn generate_run_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Use `cancel` to request an orderly stop from outside the run.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn minutes_since_start(&self) -> f64 {
        self.started.elapsed().as_secs_f64() / 60.0
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn storage_failures(&self) -> usize {
        self.storage_failures
    }

    /// Save a snapshot. On failure the run continues degraded and `None`
    /// is returned.
    pub fn persist(
        &mut self,
        descriptor: CheckpointDescriptor,
        snapshot: &Snapshot<M, O>,
    ) -> Option<CheckpointDescriptor> {
        let epoch = descriptor.epoch;
        let action = format!("save {}", descriptor.file_name());
        match self.store.save(descriptor, snapshot) {
            Ok(saved) => Some(saved),
            Err(e) => {
                self.storage_failures += 1;
                warn!(epoch, error = %e, "checkpoint save failed, continuing on in-memory state");
                self.report(RunEvent::StorageFailed {
                    epoch,
                    action,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    pub fn report(&mut self, event: RunEvent) {
        if let Err(e) = self.reporter.record_event(&event) {
            self.storage_failures += 1;
            warn!(epoch = ?event.epoch(), error = %e, "failed to record run event");
        }
    }

    pub fn report_epoch(&mut self, result: &EpochResult) {
        if let Err(e) = self.reporter.record_epoch(result) {
            self.storage_failures += 1;
            warn!(epoch = result.epoch, error = %e, "failed to record epoch result");
        }
    }

    /// Hand the summary to the reporter and tear the context down.
    ///
    /// The storage failure count is folded into the summary before writing.
    pub fn finish(mut self, mut summary: RunSummary) -> RunSummary {
        summary.storage_failures = self.storage_failures;
        if let Err(e) = self.reporter.finish(&summary) {
            summary.storage_failures += 1;
            error!(error = %e, "failed to write run summary");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::checkpoint::{MemoryCheckpointStore, Verdict};
    use crate::training::reporter::MemoryReporter;

    #[test]
    fn test_failed_save_degrades_and_reports() {
        let mut store: MemoryCheckpointStore<Vec<f64>, Vec<f64>> = MemoryCheckpointStore::new();
        store.set_fail_writes(true);
        let reporter = MemoryReporter::new();
        let mut ctx = RunContext::new("run", Box::new(store), Box::new(reporter.clone()));

        let d = CheckpointDescriptor::new("run", 4, 0.001, 55.0, Verdict::Accepted);
        assert!(ctx.persist(d, &Snapshot::new(vec![1.0], vec![])).is_none());
        assert_eq!(ctx.storage_failures(), 1);

        let events = reporter.events();
        assert!(matches!(
            &events[0],
            RunEvent::StorageFailed { epoch: 4, action, .. } if action.contains("epoch4_")
        ));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunContext::<Vec<f64>, Vec<f64>>::generate_run_id();
        let b = RunContext::<Vec<f64>, Vec<f64>>::generate_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let ctx: RunContext<Vec<f64>, Vec<f64>> = RunContext::new(
            "run",
            Box::new(MemoryCheckpointStore::new()),
            Box::new(MemoryReporter::new()),
        )
        .with_cancellation(token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
