//! Training orchestration: engine contracts, snapshots, the accept/reject
//! policy, checkpoints, reporting, and the controller that ties them together.

pub mod checkpoint;
pub mod context;
pub mod controller;
pub mod engine;
pub mod experiment;
pub mod metrics;
pub mod policy;
pub mod reporter;
pub mod snapshot;

pub use checkpoint::{
    CheckpointDescriptor, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, Verdict,
};
pub use context::RunContext;
pub use controller::{AdaptiveController, EpochOutcome, RunOutcome};
pub use engine::{BatchSource, EvalExecutor, OptimizerState, StepExecutor};
pub use experiment::RunSummary;
pub use metrics::{EpochResult, RunHistory};
pub use policy::{ControllerState, Decision, RunState, judge};
pub use reporter::{JsonlReporter, MemoryReporter, RunEvent, RunReporter};
pub use snapshot::{Snapshot, SnapshotSlots};
