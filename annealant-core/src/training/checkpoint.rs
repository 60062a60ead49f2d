//! Checkpoint persistence for training runs.
//!
//! Every saved snapshot gets a structured [`CheckpointDescriptor`] recorded in
//! the run's `checkpoints.json` manifest. The manifest is authoritative; the
//! human-readable file name is derived from the descriptor and never parsed.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::persistence;
use crate::training::snapshot::Snapshot;

const MANIFEST: &str = "checkpoints.json";

/// Why a snapshot was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected,
    /// Final artifact of the run.
    Best,
}

impl Verdict {
    /// Accepted and best snapshots are rollback candidates; rejected ones
    /// exist only for audit.
    pub fn is_retained(self) -> bool {
        !matches!(self, Verdict::Rejected)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accepted => write!(f, "accepted"),
            Verdict::Rejected => write!(f, "rejected"),
            Verdict::Best => write!(f, "best"),
        }
    }
}

/// Structured identity of one persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDescriptor {
    pub id: String,
    pub run_id: String,
    pub epoch: usize,
    pub learning_rate: f64,
    pub metric: f64,
    pub verdict: Verdict,
    /// SHA-256 of the serialized snapshot, set by the store on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Location of the snapshot, set by the store on save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl CheckpointDescriptor {
    pub fn new(
        run_id: &str,
        epoch: usize,
        learning_rate: f64,
        metric: f64,
        verdict: Verdict,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            epoch,
            learning_rate,
            metric,
            verdict,
            hash: None,
            path: None,
            created_at: Utc::now(),
        }
    }

    /// Human-readable name, e.g. `epoch3_lr0.0005_cv74.25_rejected.json`.
    pub fn file_name(&self) -> String {
        match self.verdict {
            Verdict::Accepted => format!(
                "epoch{}_lr{}_cv{}.json",
                self.epoch, self.learning_rate, self.metric
            ),
            Verdict::Rejected => format!(
                "epoch{}_lr{}_cv{}_rejected.json",
                self.epoch, self.learning_rate, self.metric
            ),
            Verdict::Best => format!("best_model_cv{}.json", self.metric),
        }
    }
}

/// Key/blob sink for snapshots. Holds no decision logic.
pub trait CheckpointStore<M, O>: Send {
    /// Persist `snapshot` under `descriptor`. Accepted and best snapshots
    /// become what [`CheckpointStore::restore`] returns.
    fn save(
        &mut self,
        descriptor: CheckpointDescriptor,
        snapshot: &Snapshot<M, O>,
    ) -> Result<CheckpointDescriptor, StorageError>;

    /// The most recently retained snapshot. Calling this repeatedly without
    /// an intervening save returns the same snapshot.
    fn restore(&self) -> Result<Snapshot<M, O>, StorageError>;

    /// Every descriptor saved so far, oldest first.
    fn list(&self) -> Result<Vec<CheckpointDescriptor>, StorageError>;
}

/// Stores snapshots as JSON files under `<base_dir>/<run_id>/`.
pub struct FileCheckpointStore {
    run_dir: PathBuf,
    retained: Option<CheckpointDescriptor>,
}

impl FileCheckpointStore {
    /// Store for a new run.
    pub fn new(base_dir: &Path, run_id: &str) -> Self {
        Self {
            run_dir: base_dir.join(run_id),
            retained: None,
        }
    }

    /// Reopen an existing run directory, e.g. for offline inspection.
    pub fn open(run_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let run_dir = run_dir.into();
        let manifest = run_dir.join(MANIFEST);
        if !manifest.exists() {
            return Err(StorageError::NotFound {
                label: manifest.display().to_string(),
            });
        }
        let mut store = Self {
            run_dir,
            retained: None,
        };
        store.retained = store
            .read_manifest()?
            .into_iter()
            .rev()
            .find(|d| d.verdict.is_retained());
        Ok(store)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.run_dir.join(MANIFEST)
    }

    fn read_manifest(&self) -> Result<Vec<CheckpointDescriptor>, StorageError> {
        let path = self.manifest_path();
        persistence::load_json(&path)
            .map(Option::unwrap_or_default)
            .map_err(|e| StorageError::read(&path, e))
    }

    /// Manifest entries, oldest first, without naming the snapshot types.
    pub fn descriptors(&self) -> Result<Vec<CheckpointDescriptor>, StorageError> {
        self.read_manifest()
    }

    /// Highest-metric retained checkpoint.
    pub fn best(&self) -> Result<Option<CheckpointDescriptor>, StorageError> {
        Ok(self
            .read_manifest()?
            .into_iter()
            .filter(|d| d.verdict.is_retained())
            .max_by(|a, b| a.metric.total_cmp(&b.metric)))
    }

    /// Compare two checkpoints by id, returning a human-readable diff.
    pub fn compare(&self, id_a: &str, id_b: &str) -> Result<String, StorageError> {
        let manifest = self.read_manifest()?;
        let find = |id: &str| {
            manifest
                .iter()
                .find(|d| d.id == id)
                .ok_or_else(|| StorageError::NotFound {
                    label: format!("checkpoint {id}"),
                })
        };
        let a = find(id_a)?;
        let b = find(id_b)?;

        Ok(format!(
            "Checkpoint comparison ({id_a} vs {id_b}):\n  Epoch:   {} -> {} (diff: {:+})\n  Metric:  {:.4} -> {:.4} (diff: {:+.4})\n  LR:      {} -> {}\n  Verdict: {} -> {}",
            a.epoch,
            b.epoch,
            b.epoch as i64 - a.epoch as i64,
            a.metric,
            b.metric,
            b.metric - a.metric,
            a.learning_rate,
            b.learning_rate,
            a.verdict,
            b.verdict,
        ))
    }
}

impl<M, O> CheckpointStore<M, O> for FileCheckpointStore
where
    M: Serialize + DeserializeOwned,
    O: Serialize + DeserializeOwned,
{
    fn save(
        &mut self,
        mut descriptor: CheckpointDescriptor,
        snapshot: &Snapshot<M, O>,
    ) -> Result<CheckpointDescriptor, StorageError> {
        let path = self.run_dir.join(descriptor.file_name());
        let hash = persistence::atomic_write_json(&path, snapshot)
            .map_err(|e| StorageError::write(&path, e))?;
        descriptor.hash = Some(hash);
        descriptor.path = Some(path);

        let mut manifest = self.read_manifest()?;
        manifest.push(descriptor.clone());
        let manifest_path = self.manifest_path();
        persistence::atomic_write_json(&manifest_path, &manifest)
            .map_err(|e| StorageError::write(&manifest_path, e))?;

        if descriptor.verdict.is_retained() {
            self.retained = Some(descriptor.clone());
        }
        Ok(descriptor)
    }

    fn restore(&self) -> Result<Snapshot<M, O>, StorageError> {
        let descriptor = self.retained.as_ref().ok_or_else(|| StorageError::NotFound {
            label: "retained snapshot".to_string(),
        })?;
        let path = descriptor
            .path
            .clone()
            .unwrap_or_else(|| self.run_dir.join(descriptor.file_name()));

        let bytes = std::fs::read(&path).map_err(|e| StorageError::read(&path, e))?;
        if let Some(expected) = &descriptor.hash {
            let actual = persistence::sha256_hex(&bytes);
            if &actual != expected {
                return Err(StorageError::Corrupt {
                    path,
                    message: format!("hash mismatch: expected {expected}, found {actual}"),
                });
            }
        }
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            path,
            message: e.to_string(),
        })
    }

    fn list(&self) -> Result<Vec<CheckpointDescriptor>, StorageError> {
        self.descriptors()
    }
}

/// Keeps snapshots in memory. Used by tests and dry runs.
pub struct MemoryCheckpointStore<M, O> {
    entries: Vec<(CheckpointDescriptor, Snapshot<M, O>)>,
    retained: Option<usize>,
    fail_writes: bool,
}

impl<M, O> Default for MemoryCheckpointStore<M, O> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            retained: None,
            fail_writes: false,
        }
    }
}

impl<M, O> MemoryCheckpointStore<M, O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail, to exercise degraded runs.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn entries(&self) -> &[(CheckpointDescriptor, Snapshot<M, O>)] {
        &self.entries
    }
}

impl<M, O> CheckpointStore<M, O> for MemoryCheckpointStore<M, O>
where
    M: Clone + Send,
    O: Clone + Send,
{
    fn save(
        &mut self,
        mut descriptor: CheckpointDescriptor,
        snapshot: &Snapshot<M, O>,
    ) -> Result<CheckpointDescriptor, StorageError> {
        if self.fail_writes {
            return Err(StorageError::write(descriptor.file_name(), "store is read-only"));
        }
        descriptor.path = Some(PathBuf::from(descriptor.file_name()));
        if descriptor.verdict.is_retained() {
            self.retained = Some(self.entries.len());
        }
        self.entries.push((descriptor.clone(), snapshot.clone()));
        Ok(descriptor)
    }

    fn restore(&self) -> Result<Snapshot<M, O>, StorageError> {
        self.retained
            .and_then(|i| self.entries.get(i))
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| StorageError::NotFound {
                label: "retained snapshot".to_string(),
            })
    }

    fn list(&self) -> Result<Vec<CheckpointDescriptor>, StorageError> {
        Ok(self.entries.iter().map(|(d, _)| d.clone()).collect())
    }
}
