//! Final experiment record for a training run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::config::TrainingConfig;
use crate::error::StorageError;
use crate::persistence;
use crate::training::policy::RunState;

/// Summary written once per run, after it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: RunState,
    pub config: TrainingConfig,
    pub epochs_run: usize,
    pub best_metric: Option<f64>,
    pub best_epoch: Option<usize>,
    /// Metric and epoch of the snapshot persisted as the final artifact.
    /// Differs from `best_*` only when warmup ended below its peak and no
    /// later epoch was accepted.
    #[serde(default)]
    pub retained_metric: Option<f64>,
    #[serde(default)]
    pub retained_epoch: Option<usize>,
    pub final_learning_rate: f64,
    pub accepted_epochs: usize,
    pub rejected_epochs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_checkpoint: Option<PathBuf>,
    /// Checkpoint or report writes that failed during the run.
    pub storage_failures: usize,
    pub total_minutes: f64,
}

impl RunSummary {
    /// True when some persistence failed and only in-memory state is intact.
    pub fn degraded(&self) -> bool {
        self.storage_failures > 0
    }

    /// Human-readable block for the append-only experiment record.
    pub fn record_block(&self) -> String {
        let c = &self.config;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Experiment {}:",
            self.finished_at.format("%Y-%m-%d %H:%M:%S")
        );
        let _ = writeln!(out, "\trun_id: {}", self.run_id);
        let _ = writeln!(out, "\tstate: {}", self.state);
        let _ = writeln!(out, "\tinitial_learning_rate: {}", c.initial_learning_rate);
        let _ = writeln!(out, "\tdecay_factor: {}", c.decay_factor);
        let _ = writeln!(out, "\tmin_epochs_before_decay: {}", c.min_epochs_before_decay);
        let _ = writeln!(out, "\tmax_epochs: {}", c.max_epochs);
        let _ = writeln!(out, "\tacceptance_margin: {}", c.acceptance_margin);
        let _ = writeln!(out, "\tbatch_size: {}", c.batch_size);
        let _ = writeln!(out, "\tepochs_run: {}", self.epochs_run);
        let _ = writeln!(out, "\tfinal_learning_rate: {}", self.final_learning_rate);
        match self.best_metric {
            Some(best) => {
                let _ = writeln!(out, "\tbest_metric: {best:.4}");
            }
            None => {
                let _ = writeln!(out, "\tbest_metric: none");
            }
        }
        if let Some(retained) = self.retained_metric.filter(|r| Some(*r) != self.best_metric) {
            let _ = writeln!(out, "\tretained_metric: {retained:.4}");
        }
        if self.degraded() {
            let _ = writeln!(out, "\tstorage_failures: {}", self.storage_failures);
        }
        out
    }

    /// Append this run to the shared experiment record file.
    pub fn append_to(&self, record_file: &Path) -> Result<(), StorageError> {
        persistence::append(record_file, &self.record_block())
            .map_err(|e| StorageError::write(record_file, e))
    }
}
