//! The accept/reject/decay/stop policy and the run state machine.
//!
//! [`ControllerState`] holds no models and does no I/O; it can be driven
//! directly from a metric sequence. The controller owns one, advances it
//! once per epoch, and acts on the [`Decision`] it returns.

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;

/// Outcome of judging one epoch's validation metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Before the decision threshold: keep the new state as the rollback
    /// point, never reject, never decay.
    Warmup,
    /// Improvement larger than the margin: keep the state and keep going.
    AcceptContinue,
    /// Improvement no larger than the margin: keep the state and stop.
    AcceptStop,
    /// No improvement: persist as rejected, roll back to the retained state.
    Reject,
}

impl Decision {
    /// Whether the epoch's state becomes the new retained snapshot.
    pub fn retains(self) -> bool {
        !matches!(self, Decision::Reject)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Warmup => "warmup",
            Decision::AcceptContinue => "accept-continue",
            Decision::AcceptStop => "accept-stop",
            Decision::Reject => "reject-rollback",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a run. Everything except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    StoppedConverged,
    StoppedMaxEpochs,
    /// Cancelled from outside (signal) before reaching another terminal state.
    Interrupted,
    /// Aborted by a numerical failure.
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "running"),
            RunState::StoppedConverged => write!(f, "stopped (converged)"),
            RunState::StoppedMaxEpochs => write!(f, "stopped (max epochs)"),
            RunState::Interrupted => write!(f, "interrupted"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Classify `metric` against `best` with strict improvement semantics.
///
/// Ties reject. A `best` of negative infinity accepts any finite metric.
pub fn judge(best: f64, metric: f64, margin: f64) -> Decision {
    let gain = metric - best;
    if gain > margin {
        Decision::AcceptContinue
    } else if gain > 0.0 {
        Decision::AcceptStop
    } else {
        Decision::Reject
    }
}

/// Mutable policy state for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// 1-based index of the epoch in progress; 0 before the first epoch.
    pub epoch_count: usize,
    /// Highest metric seen on a retained epoch; negative infinity until one
    /// exists. Never decreases. Decisions are judged against it.
    pub best_metric: f64,
    /// Epoch that produced `best_metric`.
    pub best_epoch: Option<usize>,
    /// Metric of the retained snapshot (the rollback point). Equal to
    /// `best_metric` once decisions start, unless warmup ended on a drop.
    pub retained_metric: f64,
    /// Epoch of the retained snapshot.
    pub retained_epoch: Option<usize>,
    /// Set once the decision threshold is reached; decay applies from the
    /// following epoch on.
    pub adjust_rate_flag: bool,
    pub stop_flag: bool,
    pub learning_rate: f64,
    decay_factor: f64,
    min_epochs_before_decay: usize,
    max_epochs: usize,
    acceptance_margin: f64,
}

impl ControllerState {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            epoch_count: 0,
            best_metric: f64::NEG_INFINITY,
            best_epoch: None,
            retained_metric: f64::NEG_INFINITY,
            retained_epoch: None,
            adjust_rate_flag: false,
            stop_flag: false,
            learning_rate: config.initial_learning_rate,
            decay_factor: config.decay_factor,
            min_epochs_before_decay: config.min_epochs_before_decay,
            max_epochs: config.max_epochs,
            acceptance_margin: config.acceptance_margin,
        }
    }

    /// Where the run stands between epochs.
    ///
    /// Convergence wins over the epoch bound when both hold.
    pub fn run_state(&self) -> RunState {
        if self.stop_flag {
            RunState::StoppedConverged
        } else if self.epoch_count >= self.max_epochs {
            RunState::StoppedMaxEpochs
        } else {
            RunState::Running
        }
    }

    /// Advance to the next epoch and apply learning-rate decay if active.
    ///
    /// Returns the new rate when it changed, so the caller can push it into
    /// the optimizer before the first batch.
    pub fn begin_epoch(&mut self) -> Option<f64> {
        self.advance_epoch();
        self.adjust_learning_rate()
    }

    pub fn advance_epoch(&mut self) {
        self.epoch_count += 1;
    }

    /// Undo [`Self::begin_epoch`] for an epoch that was cancelled before it
    /// could be judged, restoring the rate it started from.
    pub fn abandon_epoch(&mut self, learning_rate: f64) {
        self.epoch_count = self.epoch_count.saturating_sub(1);
        self.learning_rate = learning_rate;
    }

    /// Multiply the rate by the decay factor once the flag is set.
    /// Called once per epoch, never per batch.
    pub fn adjust_learning_rate(&mut self) -> Option<f64> {
        if self.adjust_rate_flag {
            self.learning_rate *= self.decay_factor;
            Some(self.learning_rate)
        } else {
            None
        }
    }

    /// Whether the epoch in progress is subject to accept/reject.
    pub fn in_decision_phase(&self) -> bool {
        self.epoch_count >= self.min_epochs_before_decay
    }

    /// Judge the metric of the epoch in progress and update the state.
    pub fn decide(&mut self, metric: f64) -> Decision {
        if !self.in_decision_phase() {
            self.retain(metric);
            if metric > self.best_metric {
                self.best_metric = metric;
                self.best_epoch = Some(self.epoch_count);
            }
            return Decision::Warmup;
        }

        self.adjust_rate_flag = true;
        let decision = judge(self.best_metric, metric, self.acceptance_margin);
        match decision {
            Decision::AcceptContinue | Decision::AcceptStop => {
                self.retain(metric);
                self.best_metric = metric;
                self.best_epoch = Some(self.epoch_count);
                self.stop_flag = decision == Decision::AcceptStop;
            }
            Decision::Reject | Decision::Warmup => {}
        }
        decision
    }

    fn retain(&mut self, metric: f64) {
        self.retained_metric = metric;
        self.retained_epoch = Some(self.epoch_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(min: usize, max: usize, margin: f64) -> TrainingConfig {
        TrainingConfig {
            initial_learning_rate: 0.001,
            decay_factor: 0.5,
            min_epochs_before_decay: min,
            max_epochs: max,
            acceptance_margin: margin,
            batch_size: 4,
            print_every: 20,
        }
    }

    /// Drive the state machine over `metrics` the way the controller does.
    fn drive(state: &mut ControllerState, metrics: &[f64]) -> Vec<Decision> {
        let mut decisions = Vec::new();
        for &metric in metrics {
            if state.run_state().is_terminal() {
                break;
            }
            state.begin_epoch();
            decisions.push(state.decide(metric));
        }
        decisions
    }

    #[test]
    fn test_judge_boundaries() {
        assert_eq!(judge(70.0, 76.0, 5.0), Decision::AcceptContinue);
        assert_eq!(judge(70.0, 75.0, 5.0), Decision::AcceptStop);
        assert_eq!(judge(70.0, 70.5, 5.0), Decision::AcceptStop);
        assert_eq!(judge(70.0, 70.0, 5.0), Decision::Reject);
        assert_eq!(judge(70.0, 60.0, 5.0), Decision::Reject);
        assert_eq!(judge(f64::NEG_INFINITY, -3.0, 5.0), Decision::AcceptContinue);
    }

    #[test]
    fn test_small_gain_stops_at_threshold_epoch() {
        let mut state = ControllerState::new(&config(2, 5, 5.0));
        let decisions = drive(&mut state, &[70.0, 74.0, 73.0, 80.0]);

        assert_eq!(decisions, vec![Decision::Warmup, Decision::AcceptStop]);
        assert_eq!(state.run_state(), RunState::StoppedConverged);
        assert_eq!(state.epoch_count, 2);
        assert_eq!(state.best_metric, 74.0);
        assert_eq!(state.best_epoch, Some(2));
    }

    #[test]
    fn test_large_gain_continues_then_rejects_and_decays() {
        let mut state = ControllerState::new(&config(2, 5, 5.0));
        let decisions = drive(&mut state, &[70.0, 76.0, 74.0]);

        assert_eq!(
            decisions,
            vec![Decision::Warmup, Decision::AcceptContinue, Decision::Reject]
        );
        assert_eq!(state.best_metric, 76.0);
        assert_eq!(state.run_state(), RunState::Running);
        // Decay kicked in for epoch 3, the one after the threshold.
        assert_eq!(state.learning_rate, 0.001 * 0.5);
        assert_eq!(state.begin_epoch(), Some(0.001 * 0.5 * 0.5));
    }

    #[test]
    fn test_warmup_never_rejects_or_decays() {
        let mut state = ControllerState::new(&config(4, 10, 1.0));
        let decisions = drive(&mut state, &[50.0, 40.0, 30.0]);

        assert_eq!(decisions, vec![Decision::Warmup; 3]);
        assert_eq!(state.learning_rate, 0.001);
        assert!(!state.adjust_rate_flag);
        assert_eq!(state.retained_metric, 30.0);
        assert_eq!(state.retained_epoch, Some(3));
        assert_eq!(state.best_metric, 50.0);
        assert_eq!(state.best_epoch, Some(1));
    }

    #[test]
    fn test_first_decision_after_falling_warmup_judges_against_peak() {
        let mut state = ControllerState::new(&config(3, 10, 1.0));
        let decisions = drive(&mut state, &[50.0, 40.0, 45.0, 55.0]);

        assert_eq!(
            decisions,
            vec![
                Decision::Warmup,
                Decision::Warmup,
                Decision::Reject,
                Decision::AcceptContinue
            ]
        );
        assert_eq!(state.best_metric, 55.0);
        assert_eq!(state.retained_metric, 55.0);
        assert_eq!(state.retained_epoch, Some(4));
    }

    #[test]
    fn test_abandoned_epoch_restores_rate_and_count() {
        let mut state = ControllerState::new(&config(1, 10, 1.0));
        drive(&mut state, &[10.0, 20.0]);
        let before = state.learning_rate;

        assert_eq!(state.begin_epoch(), Some(before * 0.5));
        state.abandon_epoch(before);
        assert_eq!(state.epoch_count, 2);
        assert_eq!(state.learning_rate, before);
    }

    #[test]
    fn test_tie_rejects() {
        let mut state = ControllerState::new(&config(1, 10, 1.0));
        let decisions = drive(&mut state, &[60.0, 60.0]);
        assert_eq!(decisions, vec![Decision::AcceptContinue, Decision::Reject]);
        assert!(!state.stop_flag);
    }

    #[test]
    fn test_max_epochs_terminates() {
        let mut state = ControllerState::new(&config(1, 3, 1.0));
        let decisions = drive(&mut state, &[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(decisions.len(), 3);
        assert_eq!(state.run_state(), RunState::StoppedMaxEpochs);
        assert_eq!(state.best_metric, 30.0);
    }

    #[test]
    fn test_convergence_wins_over_epoch_bound() {
        let mut state = ControllerState::new(&config(1, 2, 5.0));
        drive(&mut state, &[10.0, 12.0]);
        assert_eq!(state.epoch_count, 2);
        assert_eq!(state.run_state(), RunState::StoppedConverged);
    }

    #[test]
    fn test_first_decision_epoch_accepts_against_empty_best() {
        let mut state = ControllerState::new(&config(0, 3, 0.05));
        assert_eq!(drive(&mut state, &[1.0]), vec![Decision::AcceptContinue]);
        assert!(state.adjust_rate_flag);
    }

    #[test]
    fn test_decision_serde_names() {
        assert_eq!(
            serde_json::to_string(&Decision::AcceptContinue).unwrap(),
            "\"accept_continue\""
        );
        assert_eq!(Decision::Reject.to_string(), "reject-rollback");
        assert!(!Decision::Reject.retains());
        assert!(Decision::Warmup.retains());
    }
}
