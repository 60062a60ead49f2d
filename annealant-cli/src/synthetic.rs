//! Built-in synthetic engine: logistic regression on a seeded, linearly
//! separable dataset with label noise.
//!
//! Lets `annealant train` exercise the controller end to end without an
//! external numerical backend. The metric is validation accuracy in percent.

use annealant_core::training::{BatchSource, EvalExecutor, OptimizerState, StepExecutor};
use annealant_core::{EngineConfig, NumericalError, Snapshot};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MOMENTUM: f64 = 0.9;
const PROB_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Vec<f64>,
    pub label: f64,
}

#[derive(Debug)]
pub struct Dataset {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
}

impl Dataset {
    /// Draw both splits from one hidden hyperplane.
    pub fn generate(config: &EngineConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let truth: Vec<f64> = (0..config.features)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let bias = rng.gen_range(-0.2..0.2);

        let mut draw = |n: usize| -> Vec<Sample> {
            (0..n)
                .map(|_| {
                    let features: Vec<f64> = (0..config.features)
                        .map(|_| rng.gen_range(-1.0..1.0))
                        .collect();
                    let mut positive = dot(&truth, &features) + bias > 0.0;
                    if config.noise > 0.0 && rng.gen_bool(config.noise) {
                        positive = !positive;
                    }
                    Sample {
                        features,
                        label: if positive { 1.0 } else { 0.0 },
                    }
                })
                .collect()
        };

        let train = draw(config.train_samples);
        let validation = draw(config.validation_samples);
        Self { train, validation }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticModel {
    pub fn zeros(features: usize) -> Self {
        Self {
            weights: vec![0.0; features],
            bias: 0.0,
        }
    }

    pub fn probability(&self, features: &[f64]) -> f64 {
        sigmoid(dot(&self.weights, features) + self.bias)
    }
}

/// SGD with classical momentum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumSgd {
    pub learning_rate: f64,
    pub momentum: f64,
    pub velocity: Vec<f64>,
    pub bias_velocity: f64,
    pub steps: u64,
}

impl MomentumSgd {
    pub fn new(features: usize, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            momentum: MOMENTUM,
            velocity: vec![0.0; features],
            bias_velocity: 0.0,
            steps: 0,
        }
    }

    fn apply(&mut self, model: &mut LogisticModel, grad: &[f64], grad_bias: f64) {
        for ((w, v), g) in model
            .weights
            .iter_mut()
            .zip(self.velocity.iter_mut())
            .zip(grad)
        {
            *v = self.momentum * *v - self.learning_rate * g;
            *w += *v;
        }
        self.bias_velocity = self.momentum * self.bias_velocity - self.learning_rate * grad_bias;
        model.bias += self.bias_velocity;
        self.steps += 1;
    }
}

impl OptimizerState for MomentumSgd {
    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }
}

/// Indices into [`Dataset::train`].
pub type IndexBatch = Vec<usize>;

pub struct SyntheticExecutor {
    data: Arc<Dataset>,
    clip_grad_norm: f64,
}

#[async_trait]
impl StepExecutor for SyntheticExecutor {
    type Model = LogisticModel;
    type Optimizer = MomentumSgd;
    type Batch = IndexBatch;

    async fn step(
        &mut self,
        model: &mut LogisticModel,
        optimizer: &mut MomentumSgd,
        batch: IndexBatch,
    ) -> Result<f64, NumericalError> {
        if batch.is_empty() {
            return Err(NumericalError::engine("empty batch"));
        }
        let n = batch.len() as f64;
        let mut grad = vec![0.0; model.weights.len()];
        let mut grad_bias = 0.0;
        let mut loss = 0.0;

        for &i in &batch {
            let sample = self
                .data
                .train
                .get(i)
                .ok_or_else(|| NumericalError::engine(format!("sample {i} out of range")))?;
            let p = model.probability(&sample.features);
            loss -= sample.label * p.max(PROB_EPS).ln()
                + (1.0 - sample.label) * (1.0 - p).max(PROB_EPS).ln();
            let residual = p - sample.label;
            for (g, x) in grad.iter_mut().zip(&sample.features) {
                *g += residual * x / n;
            }
            grad_bias += residual / n;
        }

        let norm = (grad.iter().map(|g| g * g).sum::<f64>() + grad_bias * grad_bias).sqrt();
        if norm > self.clip_grad_norm {
            let scale = self.clip_grad_norm / norm;
            grad.iter_mut().for_each(|g| *g *= scale);
            grad_bias *= scale;
        }

        optimizer.apply(model, &grad, grad_bias);
        Ok(loss / n)
    }
}

pub struct SyntheticEvaluator {
    data: Arc<Dataset>,
}

#[async_trait]
impl EvalExecutor<LogisticModel> for SyntheticEvaluator {
    async fn evaluate(&self, model: &LogisticModel) -> Result<f64, NumericalError> {
        if self.data.validation.is_empty() {
            return Err(NumericalError::engine("validation set is empty"));
        }
        let correct = self
            .data
            .validation
            .iter()
            .filter(|s| (model.probability(&s.features) >= 0.5) == (s.label >= 0.5))
            .count();
        Ok(100.0 * correct as f64 / self.data.validation.len() as f64)
    }
}

/// Shuffles the training indices once per epoch, reproducibly from the seed.
pub struct ShuffledBatches {
    samples: usize,
    batch_size: usize,
    seed: u64,
}

impl BatchSource<IndexBatch> for ShuffledBatches {
    fn epoch_batches(&mut self, epoch: usize) -> Result<Vec<IndexBatch>, NumericalError> {
        let mut order: Vec<usize> = (0..self.samples).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);
        Ok(order.chunks(self.batch_size).map(<[usize]>::to_vec).collect())
    }
}

/// Everything the controller needs to train against the synthetic task.
pub struct SyntheticEngine {
    pub initial: Snapshot<LogisticModel, MomentumSgd>,
    pub executor: SyntheticExecutor,
    pub evaluator: SyntheticEvaluator,
    pub batches: ShuffledBatches,
}

impl SyntheticEngine {
    pub fn build(config: &EngineConfig, batch_size: usize, learning_rate: f64) -> Self {
        let data = Arc::new(Dataset::generate(config));
        Self {
            initial: Snapshot::new(
                LogisticModel::zeros(config.features),
                MomentumSgd::new(config.features, learning_rate),
            ),
            executor: SyntheticExecutor {
                data: Arc::clone(&data),
                clip_grad_norm: config.clip_grad_norm,
            },
            evaluator: SyntheticEvaluator {
                data: Arc::clone(&data),
            },
            batches: ShuffledBatches {
                samples: data.train.len(),
                batch_size: batch_size.max(1),
                seed: config.seed,
            },
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small() -> EngineConfig {
        EngineConfig {
            seed: 7,
            train_samples: 256,
            validation_samples: 128,
            features: 4,
            noise: 0.0,
            clip_grad_norm: 400.0,
        }
    }

    #[test]
    fn test_dataset_is_reproducible_from_seed() {
        let a = Dataset::generate(&small());
        let b = Dataset::generate(&small());
        assert_eq!(a.train, b.train);
        assert_eq!(a.validation.len(), 128);
    }

    #[test]
    fn test_batches_cover_every_sample_once_per_epoch() {
        let mut batches = ShuffledBatches {
            samples: 10,
            batch_size: 4,
            seed: 1,
        };
        let epoch = batches.epoch_batches(1).unwrap();
        assert_eq!(epoch.len(), 3);
        let mut seen: Vec<usize> = epoch.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(batches.epoch_batches(2).unwrap().concat().len(), 10);
    }

    #[test]
    fn test_same_epoch_reshuffles_identically() {
        let mut batches = ShuffledBatches {
            samples: 32,
            batch_size: 8,
            seed: 3,
        };
        assert_eq!(
            batches.epoch_batches(5).unwrap(),
            batches.epoch_batches(5).unwrap()
        );
    }

    #[tokio::test]
    async fn test_training_improves_accuracy() {
        let SyntheticEngine {
            initial,
            mut executor,
            evaluator,
            mut batches,
        } = SyntheticEngine::build(&small(), 8, 0.1);
        let Snapshot {
            mut model,
            mut optimizer,
        } = initial;

        for epoch in 1..=5 {
            for batch in batches.epoch_batches(epoch).unwrap() {
                let loss = executor.step(&mut model, &mut optimizer, batch).await.unwrap();
                assert!(loss.is_finite());
            }
        }
        let accuracy = evaluator.evaluate(&model).await.unwrap();
        assert!(accuracy > 85.0, "accuracy was {accuracy}");
        assert!(optimizer.steps > 0);
    }

    #[tokio::test]
    async fn test_gradient_is_clipped() {
        let mut config = small();
        config.clip_grad_norm = 1e-3;
        let SyntheticEngine {
            initial,
            mut executor,
            ..
        } = SyntheticEngine::build(&config, 8, 1.0);
        let Snapshot {
            mut model,
            mut optimizer,
        } = initial;
        optimizer.momentum = 0.0;

        executor
            .step(&mut model, &mut optimizer, (0..8).collect())
            .await
            .unwrap();
        let step_norm = (model.weights.iter().map(|w| w * w).sum::<f64>()
            + model.bias * model.bias)
            .sqrt();
        assert!(step_norm <= 1e-3 + 1e-12, "step norm was {step_norm}");
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_engine_error() {
        let mut engine = SyntheticEngine::build(&small(), 8, 0.1);
        let err = engine
            .executor
            .step(
                &mut engine.initial.model,
                &mut engine.initial.optimizer,
                Vec::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NumericalError::Engine { .. }));
    }
}
