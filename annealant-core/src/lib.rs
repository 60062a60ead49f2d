//! # annealant-core: adaptive, metric-driven training control
//!
//! Runs epochs of gradient-based training through an external numerical
//! engine and, after each epoch, uses a held-out metric to keep the new
//! parameters, roll back to the best-known-good snapshot, decay the learning
//! rate, or stop.
//!
//! The numerical work (forward/backward, loss, evaluation) is behind the
//! traits in [`training::engine`]; this crate owns the schedule.

pub mod config;
pub mod error;
pub mod persistence;
pub mod training;

pub use config::{
    AnnealantConfig, EngineConfig, OutputConfig, TrainingConfig, load_config, read_config,
};
pub use error::{AnnealError, ConfigError, NumericalError, StorageError};
pub use training::{
    AdaptiveController, CheckpointStore, Decision, FileCheckpointStore, JsonlReporter,
    RunContext, RunOutcome, RunState, RunSummary, Snapshot,
};
