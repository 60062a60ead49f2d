//! Contracts for the numerical engine the controller drives.
//!
//! The controller never looks inside a model or optimizer. It hands the
//! current state to a [`StepExecutor`] batch by batch, asks an
//! [`EvalExecutor`] for one scalar metric, and copies whole states around
//! when it retains or rolls back.

use async_trait::async_trait;

use crate::error::NumericalError;

/// Optimizer internals the controller is allowed to touch.
///
/// Everything else (moment estimates, step counters) stays opaque.
pub trait OptimizerState {
    fn learning_rate(&self) -> f64;
    fn set_learning_rate(&mut self, learning_rate: f64);
}

/// Runs one mini-batch: forward, loss, backward, parameter update.
#[async_trait]
pub trait StepExecutor: Send {
    type Model: Clone + Send + Sync + 'static;
    type Optimizer: OptimizerState + Clone + Send + Sync + 'static;
    type Batch: Send;

    /// Train on `batch`, mutating `model` and `optimizer` in place, and
    /// return the batch loss.
    async fn step(
        &mut self,
        model: &mut Self::Model,
        optimizer: &mut Self::Optimizer,
        batch: Self::Batch,
    ) -> Result<f64, NumericalError>;
}

/// Scores a model on the held-out set. Higher is better.
///
/// Must be deterministic for identical inputs; takes the model by shared
/// reference so it cannot mutate it.
#[async_trait]
pub trait EvalExecutor<M>: Send + Sync {
    async fn evaluate(&self, model: &M) -> Result<f64, NumericalError>;
}

/// Supplies the batches for one epoch in a freshly shuffled order.
pub trait BatchSource<B>: Send {
    fn epoch_batches(&mut self, epoch: usize) -> Result<Vec<B>, NumericalError>;
}
