//! Per-epoch results and the ordered run history.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::training::policy::Decision;

/// What one epoch produced. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochResult {
    /// 1-based epoch index.
    pub epoch: usize,
    /// Mean training loss over the epoch's batches.
    pub average_loss: f64,
    /// Validation metric (higher is better).
    pub metric: f64,
    /// Learning rate the epoch trained with.
    pub learning_rate: f64,
    pub batches: usize,
    /// Wall-clock time of this epoch.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Minutes since the run started, at the end of this epoch.
    pub minutes_since_start: f64,
    /// Filled in once the policy has judged the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}

/// Append-only record of every epoch in a run, in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHistory {
    epochs: Vec<EpochResult>,
    pub best_epoch: Option<usize>,
    pub best_metric: Option<f64>,
    pub total_training_time_secs: f64,
}

impl RunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a judged epoch. Only epochs whose state was kept can become
    /// best, and best never moves to a lower metric.
    pub fn record(&mut self, result: EpochResult) {
        self.total_training_time_secs += result.elapsed.as_secs_f64();
        if result.decision.is_some_and(Decision::retains)
            && self.best_metric.is_none_or(|best| result.metric > best)
        {
            self.best_metric = Some(result.metric);
            self.best_epoch = Some(result.epoch);
        }
        self.epochs.push(result);
    }

    pub fn epochs(&self) -> &[EpochResult] {
        &self.epochs
    }

    pub fn metric_history(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.metric).collect()
    }

    pub fn learning_rates(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.learning_rate).collect()
    }

    pub fn count(&self, decision: Decision) -> usize {
        self.epochs
            .iter()
            .filter(|e| e.decision == Some(decision))
            .count()
    }
}

/// Running mean of batch losses within one epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossAccumulator {
    total: f64,
    batches: usize,
}

impl LossAccumulator {
    pub fn push(&mut self, loss: f64) {
        self.total += loss;
        self.batches += 1;
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Mean loss so far; zero for an empty epoch.
    pub fn mean(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.total / self.batches as f64
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, metric: f64, decision: Decision) -> EpochResult {
        EpochResult {
            epoch,
            average_loss: 1.0 / epoch as f64,
            metric,
            learning_rate: 0.001,
            batches: 10,
            elapsed: Duration::from_millis(1500),
            minutes_since_start: epoch as f64 * 0.025,
            decision: Some(decision),
        }
    }

    #[test]
    fn test_history_tracks_retained_best() {
        let mut history = RunHistory::new();
        history.record(epoch(1, 70.0, Decision::Warmup));
        history.record(epoch(2, 76.0, Decision::AcceptContinue));
        history.record(epoch(3, 74.0, Decision::Reject));

        assert_eq!(history.epochs().len(), 3);
        assert_eq!(history.best_epoch, Some(2));
        assert_eq!(history.best_metric, Some(76.0));
        assert_eq!(history.metric_history(), vec![70.0, 76.0, 74.0]);
        assert_eq!(history.count(Decision::Reject), 1);
        assert!((history.total_training_time_secs - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_history_best_ignores_falling_warmup() {
        let mut history = RunHistory::new();
        history.record(epoch(1, 50.0, Decision::Warmup));
        history.record(epoch(2, 40.0, Decision::Warmup));

        assert_eq!(history.best_epoch, Some(1));
        assert_eq!(history.best_metric, Some(50.0));
    }

    #[test]
    fn test_loss_accumulator_mean() {
        let mut acc = LossAccumulator::default();
        assert_eq!(acc.mean(), 0.0);
        acc.push(2.0);
        acc.push(4.0);
        assert_eq!(acc.batches(), 2);
        assert_eq!(acc.mean(), 3.0);
    }

    #[test]
    fn test_epoch_result_serializes_elapsed_as_seconds() {
        let value = serde_json::to_value(epoch(1, 70.0, Decision::Warmup)).unwrap();
        assert_eq!(value["elapsed"], serde_json::json!(1.5));
        assert_eq!(value["decision"], serde_json::json!("warmup"));
        let back: EpochResult = serde_json::from_value(value).unwrap();
        assert_eq!(back.elapsed, Duration::from_millis(1500));
    }
}
