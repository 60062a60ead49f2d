//! Property-based tests for the accept/reject/decay/stop policy.

use proptest::prelude::*;

use annealant_core::TrainingConfig;
use annealant_core::training::{ControllerState, Decision, RunState, judge};

fn config(min: usize, max: usize, margin: f64, decay: f64) -> TrainingConfig {
    TrainingConfig {
        initial_learning_rate: 0.001,
        decay_factor: decay,
        min_epochs_before_decay: min,
        max_epochs: max,
        acceptance_margin: margin,
        batch_size: 4,
        print_every: 20,
    }
}

/// Run the state machine over `metrics` and collect
/// `(decision, learning rate used, best after the epoch)` per epoch.
fn drive(state: &mut ControllerState, metrics: &[f64]) -> Vec<(Decision, f64, f64)> {
    let mut trace = Vec::new();
    for &metric in metrics {
        if state.run_state() != RunState::Running {
            break;
        }
        state.begin_epoch();
        let lr = state.learning_rate;
        let decision = state.decide(metric);
        trace.push((decision, lr, state.best_metric));
    }
    trace
}

proptest! {
    #[test]
    fn judge_partitions_by_gain(
        best in -100.0f64..100.0,
        metric in -100.0f64..100.0,
        margin in 0.001f64..10.0,
    ) {
        let gain = metric - best;
        let decision = judge(best, metric, margin);
        prop_assert_eq!(decision == Decision::AcceptContinue, gain > margin);
        prop_assert_eq!(decision == Decision::AcceptStop, gain > 0.0 && gain <= margin);
        prop_assert_eq!(decision == Decision::Reject, gain <= 0.0);
    }

    #[test]
    fn warmup_never_rejects_or_decays(
        min in 2usize..10,
        metrics in prop::collection::vec(0.0f64..100.0, 1..10),
    ) {
        let mut state = ControllerState::new(&config(min, 20, 0.5, 0.5));
        let trace = drive(&mut state, &metrics);
        for (epoch, (decision, lr, _)) in trace.iter().enumerate() {
            if epoch + 1 < min {
                prop_assert_eq!(*decision, Decision::Warmup);
                prop_assert_eq!(*lr, 0.001);
            }
        }
    }

    #[test]
    fn decay_applies_every_epoch_after_threshold(
        min in 0usize..5,
        decay in 0.1f64..=1.0,
        metrics in prop::collection::vec(0.0f64..100.0, 1..15),
    ) {
        let mut state = ControllerState::new(&config(min, 30, 0.01, decay));
        let trace = drive(&mut state, &metrics);
        let threshold = min.max(1);
        for (i, pair) in trace.windows(2).enumerate() {
            let epoch = i + 1;
            let (_, lr_now, _) = pair[0];
            let (_, lr_next, _) = pair[1];
            if epoch >= threshold {
                prop_assert_eq!(lr_next, lr_now * decay);
            } else {
                prop_assert_eq!(lr_next, lr_now);
            }
        }
    }

    #[test]
    fn best_is_non_decreasing_across_the_run(
        min in 0usize..6,
        metrics in prop::collection::vec(0.0f64..100.0, 1..20),
    ) {
        let mut state = ControllerState::new(&config(min, 40, 0.01, 0.5));
        let trace = drive(&mut state, &metrics);
        for pair in trace.windows(2) {
            prop_assert!(pair[1].2 >= pair[0].2);
        }
        prop_assert!(state.retained_metric <= state.best_metric);
    }

    #[test]
    fn run_never_exceeds_max_epochs(
        max in 1usize..12,
        metrics in prop::collection::vec(0.0f64..100.0, 0..30),
    ) {
        let mut state = ControllerState::new(&config(0, max, 0.01, 0.5));
        let trace = drive(&mut state, &metrics);
        prop_assert!(trace.len() <= max);
        if let Some((Decision::AcceptStop, _, _)) = trace.last() {
            prop_assert_eq!(state.run_state(), RunState::StoppedConverged);
        }
    }
}
