//! The adaptive training controller.
//!
//! Drives epochs strictly one after another: train on every batch, evaluate
//! once, judge the metric, then retain, roll back, or stop before the next
//! epoch is allowed to start. The controller is the only owner of the live
//! model/optimizer state between epochs and lends it to the step executor
//! for the duration of one batch at a time.

use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TrainingConfig;
use crate::error::{AnnealError, NumericalError};
use crate::training::checkpoint::{CheckpointDescriptor, Verdict};
use crate::training::context::RunContext;
use crate::training::engine::{BatchSource, EvalExecutor, OptimizerState, StepExecutor};
use crate::training::experiment::RunSummary;
use crate::training::metrics::{EpochResult, LossAccumulator, RunHistory};
use crate::training::policy::{ControllerState, Decision, RunState};
use crate::training::reporter::RunEvent;
use crate::training::snapshot::{Snapshot, SnapshotSlots};

/// Result of running one epoch's training and evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EpochOutcome {
    Completed(EpochResult),
    /// Cancellation was requested between batches; the epoch was abandoned.
    Cancelled,
}

/// Everything a finished run hands back.
pub struct RunOutcome<M, O> {
    pub summary: RunSummary,
    pub history: RunHistory,
    /// The retained snapshot (or the live one if nothing was ever retained).
    pub best: Snapshot<M, O>,
}

pub struct AdaptiveController<S, E, B>
where
    S: StepExecutor,
{
    config: TrainingConfig,
    state: ControllerState,
    slots: SnapshotSlots<S::Model, S::Optimizer>,
    history: RunHistory,
    executor: S,
    evaluator: E,
    batches: B,
    ctx: RunContext<S::Model, S::Optimizer>,
}

impl<S, E, B> AdaptiveController<S, E, B>
where
    S: StepExecutor,
    E: EvalExecutor<S::Model>,
    B: BatchSource<S::Batch>,
{
    /// Validate `config` and take ownership of the initial state.
    ///
    /// The optimizer's rate is overwritten with the configured initial rate.
    pub fn new(
        config: TrainingConfig,
        mut initial: Snapshot<S::Model, S::Optimizer>,
        executor: S,
        evaluator: E,
        batches: B,
        ctx: RunContext<S::Model, S::Optimizer>,
    ) -> Result<Self, AnnealError> {
        config.validate()?;
        initial
            .optimizer
            .set_learning_rate(config.initial_learning_rate);
        Ok(Self {
            state: ControllerState::new(&config),
            config,
            slots: SnapshotSlots::new(initial),
            history: RunHistory::new(),
            executor,
            evaluator,
            batches,
            ctx,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn current(&self) -> &Snapshot<S::Model, S::Optimizer> {
        self.slots.current()
    }

    pub fn retained(&self) -> Option<&Snapshot<S::Model, S::Optimizer>> {
        self.slots.retained()
    }

    /// Apply decay for the epoch in progress and push the controller's rate
    /// into the optimizer. The controller's rate is authoritative, so this
    /// also overrides whatever rate a rolled-back optimizer carried.
    ///
    /// Returns the decayed rate, if any; the caller reports it once the
    /// epoch has trained.
    pub fn adjust_learning_rate(&mut self) -> Option<f64> {
        let decayed = self.state.adjust_learning_rate();
        self.sync_optimizer_rate();
        decayed
    }

    fn sync_optimizer_rate(&mut self) {
        let learning_rate = self.state.learning_rate;
        let optimizer = &mut self.slots.current_mut().optimizer;
        let carried = optimizer.learning_rate();
        if carried != learning_rate {
            debug!(carried, learning_rate, "overriding optimizer learning rate");
        }
        optimizer.set_learning_rate(learning_rate);
    }

    fn report_decay(&mut self, learning_rate: f64) {
        let epoch = self.state.epoch_count;
        info!(epoch, learning_rate, "learning rate decayed");
        self.ctx.report(RunEvent::LearningRateDecayed {
            epoch,
            learning_rate,
        });
    }

    /// Train on every batch of the epoch in progress, then evaluate once.
    ///
    /// Nothing is retained or persisted here; see [`Self::decide`].
    pub async fn run_epoch(&mut self) -> Result<EpochOutcome, NumericalError> {
        let epoch = self.state.epoch_count;
        let started = Instant::now();
        let batches = self.batches.epoch_batches(epoch)?;
        let mut losses = LossAccumulator::default();

        for (i, batch) in batches.into_iter().enumerate() {
            if self.ctx.is_cancelled() {
                return Ok(EpochOutcome::Cancelled);
            }
            let current = self.slots.current_mut();
            let loss = self
                .executor
                .step(&mut current.model, &mut current.optimizer, batch)
                .await?;
            if !loss.is_finite() {
                return Err(NumericalError::NonFiniteLoss {
                    epoch,
                    batch: i + 1,
                    loss,
                });
            }
            losses.push(loss);
            if (i + 1) % self.config.print_every == 0 {
                debug!(epoch, batch = i + 1, running_loss = losses.mean(), "batch progress");
            }
        }
        info!(
            epoch,
            average_loss = losses.mean(),
            batches = losses.batches(),
            "epoch done"
        );

        let metric = self.evaluator.evaluate(&self.slots.current().model).await?;
        if !metric.is_finite() {
            return Err(NumericalError::NonFiniteMetric { epoch, metric });
        }

        Ok(EpochOutcome::Completed(EpochResult {
            epoch,
            average_loss: losses.mean(),
            metric,
            learning_rate: self.state.learning_rate,
            batches: losses.batches(),
            elapsed: started.elapsed(),
            minutes_since_start: self.ctx.minutes_since_start(),
            decision: None,
        }))
    }

    /// Judge the epoch's metric and retain, persist, or roll back.
    pub fn decide(&mut self, mut result: EpochResult) -> Decision {
        let epoch = result.epoch;
        let previous_retained_epoch = self.state.retained_epoch;
        let decision = self.state.decide(result.metric);

        match decision {
            Decision::Warmup => self.slots.retain(),
            Decision::AcceptContinue | Decision::AcceptStop => {
                self.slots.retain();
                let descriptor = self.descriptor(epoch, result.metric, Verdict::Accepted);
                self.ctx.persist(descriptor, self.slots.current());
            }
            Decision::Reject => match self.slots.rollback() {
                Some(rejected) => {
                    let descriptor = self.descriptor(epoch, result.metric, Verdict::Rejected);
                    self.ctx.persist(descriptor, &rejected);
                    self.ctx.report(RunEvent::RolledBack {
                        epoch,
                        restored_epoch: previous_retained_epoch,
                    });
                }
                None => warn!(epoch, "rejected epoch with nothing retained to roll back to"),
            },
        }

        info!(
            epoch,
            metric = result.metric,
            best_metric = self.state.best_metric,
            retained_metric = self.state.retained_metric,
            learning_rate = self.state.learning_rate,
            minutes = result.minutes_since_start,
            %decision,
            "epoch judged"
        );
        self.ctx.report(RunEvent::Decided {
            epoch,
            metric: result.metric,
            best_metric: self.state.best_metric,
            retained_metric: self.state.retained_metric,
            learning_rate: self.state.learning_rate,
            decision,
        });

        result.decision = Some(decision);
        self.ctx.report_epoch(&result);
        self.history.record(result);
        decision
    }

    /// Run epochs until a terminal state, then persist the best snapshot and
    /// write the summary.
    ///
    /// A numerical failure aborts the run after a best-effort flush of the
    /// retained snapshot.
    pub async fn run(mut self) -> Result<RunOutcome<S::Model, S::Optimizer>, AnnealError> {
        info!(run_id = self.ctx.run_id(), "training run started");
        let run_id = self.ctx.run_id().to_string();
        self.ctx.report(RunEvent::Started { run_id });

        let terminal = loop {
            match self.state.run_state() {
                RunState::Running => {}
                terminal => break terminal,
            }
            if self.ctx.is_cancelled() {
                break self.interrupted();
            }

            let rate_before = self.state.learning_rate;
            self.state.advance_epoch();
            let decayed = self.adjust_learning_rate();
            info!(epoch = self.state.epoch_count, "start training epoch");

            let outcome = match self.run_epoch().await {
                Ok(EpochOutcome::Completed(result)) => Ok(result),
                Ok(EpochOutcome::Cancelled) => {
                    self.state.abandon_epoch(rate_before);
                    self.sync_optimizer_rate();
                    break self.interrupted();
                }
                Err(e) => Err(e),
            };
            if let Some(learning_rate) = decayed {
                self.report_decay(learning_rate);
            }

            match outcome {
                Ok(result) => {
                    self.decide(result);
                }
                Err(e) => {
                    let epoch = self.state.epoch_count;
                    error!(epoch, error = %e, "numerical failure, aborting run");
                    self.ctx.report(RunEvent::NumericalFailed {
                        epoch,
                        error: e.to_string(),
                    });
                    self.finish(RunState::Failed);
                    return Err(e.into());
                }
            }
        };

        Ok(self.finish(terminal))
    }

    fn interrupted(&mut self) -> RunState {
        let epoch = self.state.epoch_count;
        warn!(epoch, "run interrupted, flushing retained snapshot");
        self.ctx.report(RunEvent::Interrupted { epoch });
        RunState::Interrupted
    }

    fn descriptor(&self, epoch: usize, metric: f64, verdict: Verdict) -> CheckpointDescriptor {
        CheckpointDescriptor::new(
            self.ctx.run_id(),
            epoch,
            self.state.learning_rate,
            metric,
            verdict,
        )
    }

    /// Learning rate the retained epoch trained with.
    fn retained_learning_rate(&self) -> f64 {
        self.state
            .retained_epoch
            .and_then(|kept| self.history.epochs().iter().find(|e| e.epoch == kept))
            .map_or(self.state.learning_rate, |e| e.learning_rate)
    }

    fn finish(self, terminal: RunState) -> RunOutcome<S::Model, S::Optimizer> {
        let retained_learning_rate = self.retained_learning_rate();
        let Self {
            config,
            state,
            slots,
            history,
            mut ctx,
            ..
        } = self;

        let best_checkpoint = match (slots.retained(), state.retained_epoch) {
            (Some(retained), Some(retained_epoch)) => {
                let descriptor = CheckpointDescriptor::new(
                    ctx.run_id(),
                    retained_epoch,
                    retained_learning_rate,
                    state.retained_metric,
                    Verdict::Best,
                );
                ctx.persist(descriptor, retained).and_then(|saved| saved.path)
            }
            _ => {
                warn!("no retained snapshot to persist as final artifact");
                None
            }
        };

        let best_metric = state.best_epoch.map(|_| state.best_metric);
        let retained_metric = state.retained_epoch.map(|_| state.retained_metric);
        info!(state = %terminal, best_metric = ?best_metric, "end training");
        ctx.report(RunEvent::Finished {
            state: terminal,
            best_metric,
        });

        let summary = RunSummary {
            run_id: ctx.run_id().to_string(),
            started_at: ctx.started_at(),
            finished_at: chrono::Utc::now(),
            state: terminal,
            config,
            epochs_run: history.epochs().len(),
            best_metric,
            best_epoch: state.best_epoch,
            retained_metric,
            retained_epoch: state.retained_epoch,
            final_learning_rate: state.learning_rate,
            accepted_epochs: history.count(Decision::AcceptContinue)
                + history.count(Decision::AcceptStop),
            rejected_epochs: history.count(Decision::Reject),
            best_checkpoint,
            storage_failures: 0,
            total_minutes: ctx.minutes_since_start(),
        };
        let summary = ctx.finish(summary);

        RunOutcome {
            summary,
            history,
            best: slots.into_best(),
        }
    }
}
