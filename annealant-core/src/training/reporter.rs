//! Run reporting: per-epoch results, decisions, errors, and the final summary.
//!
//! Reporters are write-only sinks. A failed write is surfaced to the caller
//! but never rolls back controller state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::StorageError;
use crate::persistence;
use crate::training::experiment::RunSummary;
use crate::training::metrics::EpochResult;
use crate::training::policy::{Decision, RunState};

/// Something that happened during a run, other than an epoch completing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: String,
    },
    Decided {
        epoch: usize,
        metric: f64,
        best_metric: f64,
        /// Metric of the snapshot the next epoch starts from.
        retained_metric: f64,
        learning_rate: f64,
        decision: Decision,
    },
    LearningRateDecayed {
        epoch: usize,
        learning_rate: f64,
    },
    RolledBack {
        epoch: usize,
        restored_epoch: Option<usize>,
    },
    StorageFailed {
        epoch: usize,
        action: String,
        error: String,
    },
    NumericalFailed {
        epoch: usize,
        error: String,
    },
    Interrupted {
        epoch: usize,
    },
    Finished {
        state: RunState,
        best_metric: Option<f64>,
    },
}

impl RunEvent {
    pub fn epoch(&self) -> Option<usize> {
        match self {
            RunEvent::Decided { epoch, .. }
            | RunEvent::LearningRateDecayed { epoch, .. }
            | RunEvent::RolledBack { epoch, .. }
            | RunEvent::StorageFailed { epoch, .. }
            | RunEvent::NumericalFailed { epoch, .. }
            | RunEvent::Interrupted { epoch } => Some(*epoch),
            RunEvent::Started { .. } | RunEvent::Finished { .. } => None,
        }
    }
}

/// Write-only sink for run progress.
pub trait RunReporter: Send {
    fn record_epoch(&mut self, result: &EpochResult) -> Result<(), StorageError>;
    fn record_event(&mut self, event: &RunEvent) -> Result<(), StorageError>;
    fn finish(&mut self, summary: &RunSummary) -> Result<(), StorageError>;
}

#[derive(Serialize)]
struct Line<'a, T: Serialize> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct EpochLine<'a> {
    kind: &'static str,
    #[serde(flatten)]
    result: &'a EpochResult,
}

/// Appends JSON lines to `<run dir>/history.jsonl`, writes `summary.json`
/// at the end, and appends a text block to the shared record file.
pub struct JsonlReporter {
    history_path: PathBuf,
    summary_path: PathBuf,
    record_file: PathBuf,
}

impl JsonlReporter {
    pub fn new(run_dir: &Path, record_file: &Path) -> Self {
        Self {
            history_path: run_dir.join("history.jsonl"),
            summary_path: run_dir.join("summary.json"),
            record_file: record_file.to_path_buf(),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    fn append<T: Serialize>(&self, body: &T) -> Result<(), StorageError> {
        let line = Line {
            at: Utc::now(),
            body,
        };
        persistence::append_json_line(&self.history_path, &line)
            .map_err(|e| StorageError::write(&self.history_path, e))
    }
}

impl RunReporter for JsonlReporter {
    fn record_epoch(&mut self, result: &EpochResult) -> Result<(), StorageError> {
        self.append(&EpochLine {
            kind: "epoch",
            result,
        })
    }

    fn record_event(&mut self, event: &RunEvent) -> Result<(), StorageError> {
        self.append(event)
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), StorageError> {
        persistence::atomic_write_json(&self.summary_path, summary)
            .map_err(|e| StorageError::write(&self.summary_path, e))?;
        summary.append_to(&self.record_file)
    }
}

#[derive(Debug, Default)]
struct Recorded {
    epochs: Vec<EpochResult>,
    events: Vec<RunEvent>,
    summary: Option<RunSummary>,
}

/// Collects everything in memory. Clones share the same buffer, so a test
/// can keep one handle and give the other to the controller.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    inner: Arc<Mutex<Recorded>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epochs(&self) -> Vec<EpochResult> {
        self.lock().epochs.clone()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.lock().events.clone()
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.lock().summary.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RunReporter for MemoryReporter {
    fn record_epoch(&mut self, result: &EpochResult) -> Result<(), StorageError> {
        self.lock().epochs.push(result.clone());
        Ok(())
    }

    fn record_event(&mut self, event: &RunEvent) -> Result<(), StorageError> {
        self.lock().events.push(event.clone());
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<(), StorageError> {
        self.lock().summary = Some(summary.clone());
        Ok(())
    }
}
