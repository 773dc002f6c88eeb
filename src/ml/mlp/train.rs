use rand::rngs::StdRng;
use rand::{Rng, SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::adam::AdamState;
use super::model::{Activations, SpamNet, is_spam_probability};
use crate::features::SparseVector;
use crate::ml::metrics::{
    ConfusionMatrix, EvalMetrics, accuracy, binary_cross_entropy, precision_recall_by_class,
};

/// Errors raised while preparing or fitting the classifier.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Training needs at least {required} examples, found {found}")]
    TooFewExamples { required: usize, found: usize },
    #[error("Training data has no {label} examples; both ham and spam are required")]
    MissingClass { label: &'static str },
    #[error("Mismatched feature/target lengths ({features} rows, {targets} targets)")]
    MismatchedLengths { features: usize, targets: usize },
    #[error("Feature row has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Invalid training options: {0}")]
    InvalidOptions(String),
    #[error("Training diverged in epoch {epoch}: loss is not finite")]
    Diverged { epoch: usize },
}

/// Largest network [`train_spam_net`] will allocate, counting weights and biases.
pub const MAX_PARAMETERS: usize = 1 << 28;

/// Hyperparameters for [`train_spam_net`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub hidden1: usize,
    pub hidden2: usize,
    pub dropout: f32,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            hidden1: 128,
            hidden2: 64,
            dropout: 0.2,
            epochs: 25,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

impl TrainOptions {
    pub fn validate(&self) -> Result<(), TrainingError> {
        if self.hidden1 == 0 || self.hidden2 == 0 {
            return Err(TrainingError::InvalidOptions(
                "hidden layer sizes must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidOptions(
                "batch_size must be positive".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidOptions(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::InvalidOptions(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        self.check_size(1)
    }

    /// Weights plus biases of a network over `input_dim` features; `None` on overflow.
    pub fn parameter_count(&self, input_dim: usize) -> Option<usize> {
        let layer = |inputs: usize, outputs: usize| inputs.checked_mul(outputs)?.checked_add(outputs);
        layer(input_dim, self.hidden1)?
            .checked_add(layer(self.hidden1, self.hidden2)?)?
            .checked_add(layer(self.hidden2, 1)?)
    }

    /// Reject layer sizes that would overflow or exceed [`MAX_PARAMETERS`] for `input_dim` features.
    pub fn check_size(&self, input_dim: usize) -> Result<(), TrainingError> {
        match self.parameter_count(input_dim) {
            Some(count) if count <= MAX_PARAMETERS => Ok(()),
            _ => Err(TrainingError::InvalidOptions(format!(
                "network of {input_dim} -> {} -> {} -> 1 exceeds {MAX_PARAMETERS} parameters",
                self.hidden1, self.hidden2
            ))),
        }
    }
}

/// Feature rows with binary targets (`1.0` = spam).
#[derive(Debug, Clone, Default)]
pub struct TrainDataset {
    pub x: Vec<SparseVector>,
    pub y: Vec<f32>,
}

impl TrainDataset {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Per-epoch progress; validation fields are present when a validation set was given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub train_loss: f32,
    pub validation_loss: Option<f32>,
    pub validation_accuracy: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct TrainedNet {
    pub net: SpamNet,
    pub history: Vec<EpochStats>,
}

#[derive(Debug, Clone)]
struct Gradients {
    w1: Vec<f32>,
    b1: Vec<f32>,
    w2: Vec<f32>,
    b2: Vec<f32>,
    w3: Vec<f32>,
    b3: Vec<f32>,
}

impl Gradients {
    fn zeros_like(net: &SpamNet) -> Self {
        Self {
            w1: vec![0.0; net.hidden1.weights.len()],
            b1: vec![0.0; net.hidden1.bias.len()],
            w2: vec![0.0; net.hidden2.weights.len()],
            b2: vec![0.0; net.hidden2.bias.len()],
            w3: vec![0.0; net.output.weights.len()],
            b3: vec![0.0; net.output.bias.len()],
        }
    }

    fn clear(&mut self) {
        for buf in [
            &mut self.w1,
            &mut self.b1,
            &mut self.w2,
            &mut self.b2,
            &mut self.w3,
            &mut self.b3,
        ] {
            buf.fill(0.0);
        }
    }

    fn scale(&mut self, factor: f32) {
        for buf in [
            &mut self.w1,
            &mut self.b1,
            &mut self.w2,
            &mut self.b2,
            &mut self.w3,
            &mut self.b3,
        ] {
            for g in buf.iter_mut() {
                *g *= factor;
            }
        }
    }
}

struct Optimizer {
    w1: AdamState,
    b1: AdamState,
    w2: AdamState,
    b2: AdamState,
    w3: AdamState,
    b3: AdamState,
    step: u32,
}

impl Optimizer {
    fn new(net: &SpamNet) -> Self {
        Self {
            w1: AdamState::new(net.hidden1.weights.len()),
            b1: AdamState::new(net.hidden1.bias.len()),
            w2: AdamState::new(net.hidden2.weights.len()),
            b2: AdamState::new(net.hidden2.bias.len()),
            w3: AdamState::new(net.output.weights.len()),
            b3: AdamState::new(net.output.bias.len()),
            step: 0,
        }
    }

    fn apply(&mut self, net: &mut SpamNet, grads: &Gradients, learning_rate: f32) {
        self.step = self.step.saturating_add(1);
        let t = self.step;
        self.w1.update(&mut net.hidden1.weights, &grads.w1, learning_rate, t);
        self.b1.update(&mut net.hidden1.bias, &grads.b1, learning_rate, t);
        self.w2.update(&mut net.hidden2.weights, &grads.w2, learning_rate, t);
        self.b2.update(&mut net.hidden2.bias, &grads.b2, learning_rate, t);
        self.w3.update(&mut net.output.weights, &grads.w3, learning_rate, t);
        self.b3.update(&mut net.output.bias, &grads.b3, learning_rate, t);
    }
}

/// Fit a [`SpamNet`] with mini-batch Adam on binary cross-entropy.
///
/// `validation` is only scored after each epoch; it never influences the weights.
pub fn train_spam_net(
    dataset: &TrainDataset,
    options: &TrainOptions,
    validation: Option<&TrainDataset>,
) -> Result<TrainedNet, TrainingError> {
    options.validate()?;
    if dataset.x.len() != dataset.y.len() {
        return Err(TrainingError::MismatchedLengths {
            features: dataset.x.len(),
            targets: dataset.y.len(),
        });
    }
    let Some(first) = dataset.x.first() else {
        return Err(TrainingError::TooFewExamples {
            required: 1,
            found: 0,
        });
    };
    let d = first.dim;
    options.check_size(d)?;
    for row in dataset.x.iter().chain(validation.into_iter().flat_map(|v| v.x.iter())) {
        if row.dim != d {
            return Err(TrainingError::DimensionMismatch {
                expected: d,
                actual: row.dim,
            });
        }
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut net = SpamNet::glorot(d, options.hidden1, options.hidden2, options.dropout, &mut rng);
    let mut optimizer = Optimizer::new(&net);
    let mut grads = Gradients::zeros_like(&net);
    let mut acts = Activations::new(&net);
    let mut mask = vec![1.0f32; options.hidden1];
    let mut d_hidden1 = vec![0.0f32; options.hidden1];
    let mut d_hidden2 = vec![0.0f32; options.hidden2];
    let keep_scale = 1.0 / (1.0 - options.dropout);

    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    let mut history = Vec::with_capacity(options.epochs);

    for epoch in 1..=options.epochs {
        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0f32;
        for batch in indices.chunks(options.batch_size) {
            grads.clear();
            for &idx in batch {
                let x = &dataset.x[idx];
                let y = dataset.y[idx];
                for m in mask.iter_mut() {
                    *m = if options.dropout > 0.0 && rng.random::<f32>() < options.dropout {
                        0.0
                    } else {
                        keep_scale
                    };
                }
                let p = net.forward_into(x, Some(&mask), &mut acts);
                epoch_loss += binary_cross_entropy(p, y);

                // Sigmoid + cross-entropy collapse to `p - y` at the output logit.
                let d_logit = p - y;
                grads.b3[0] += d_logit;
                for j in 0..options.hidden2 {
                    grads.w3[j] += d_logit * acts.a2[j];
                    d_hidden2[j] = if acts.z2[j] > 0.0 {
                        d_logit * net.output.weights[j]
                    } else {
                        0.0
                    };
                }

                d_hidden1.fill(0.0);
                for j in 0..options.hidden2 {
                    let dz = d_hidden2[j];
                    if dz == 0.0 {
                        continue;
                    }
                    grads.b2[j] += dz;
                    let base = j * options.hidden1;
                    for h in 0..options.hidden1 {
                        grads.w2[base + h] += dz * acts.a1[h];
                        d_hidden1[h] += dz * net.hidden2.weights[base + h];
                    }
                }

                for h in 0..options.hidden1 {
                    let dz = if acts.z1[h] > 0.0 {
                        d_hidden1[h] * mask[h]
                    } else {
                        0.0
                    };
                    if dz == 0.0 {
                        continue;
                    }
                    grads.b1[h] += dz;
                    let base = h * d;
                    for (i, value) in x.iter() {
                        grads.w1[base + i] += dz * value;
                    }
                }
            }
            grads.scale(1.0 / batch.len() as f32);
            optimizer.apply(&mut net, &grads, options.learning_rate);
        }

        let train_loss = epoch_loss / dataset.len() as f32;
        if !train_loss.is_finite() {
            return Err(TrainingError::Diverged { epoch });
        }
        let validation_metrics = validation.filter(|v| !v.is_empty()).map(|v| evaluate(&net, v));
        let stats = EpochStats {
            epoch,
            train_loss,
            validation_loss: validation_metrics.map(|m| m.loss),
            validation_accuracy: validation_metrics.map(|m| m.accuracy),
        };
        tracing::debug!(
            epoch,
            train_loss,
            validation_loss = ?stats.validation_loss,
            validation_accuracy = ?stats.validation_accuracy,
            "Finished training epoch"
        );
        history.push(stats);
    }

    Ok(TrainedNet { net, history })
}

/// Score `dataset` at the 0.5 decision boundary.
pub fn evaluate(net: &SpamNet, dataset: &TrainDataset) -> EvalMetrics {
    let mut cm = ConfusionMatrix::new(2);
    let mut loss = 0.0f32;
    let mut acts = Activations::new(net);
    for (row, &target) in dataset.x.iter().zip(dataset.y.iter()) {
        let p = net.forward_into(row, None, &mut acts);
        loss += binary_cross_entropy(p, target);
        let truth = usize::from(target >= 0.5);
        let predicted = usize::from(is_spam_probability(p));
        cm.add(truth, predicted);
    }
    let per_class = precision_recall_by_class(&cm);
    EvalMetrics {
        accuracy: accuracy(&cm),
        loss: if dataset.is_empty() {
            0.0
        } else {
            loss / dataset.len() as f32
        },
        spam_precision: per_class[1].precision,
        spam_recall: per_class[1].recall,
        support: dataset.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(dim: usize, idx: u32) -> SparseVector {
        SparseVector {
            dim,
            indices: vec![idx],
            values: vec![1.0],
        }
    }

    fn separable() -> TrainDataset {
        let mut data = TrainDataset::default();
        for rep in 0..8 {
            let idx = (rep % 2) as u32;
            data.x.push(one_hot(4, idx));
            data.y.push(0.0);
            data.x.push(one_hot(4, idx + 2));
            data.y.push(1.0);
        }
        data
    }

    fn quick_options() -> TrainOptions {
        TrainOptions {
            hidden1: 16,
            hidden2: 8,
            epochs: 150,
            batch_size: 8,
            learning_rate: 0.01,
            ..TrainOptions::default()
        }
    }

    #[test]
    fn learns_a_separable_problem() {
        let data = separable();
        let trained = train_spam_net(&data, &quick_options(), Some(&data)).unwrap();
        trained.net.validate().unwrap();
        let metrics = evaluate(&trained.net, &data);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(trained.history.len(), 150);
        let first = trained.history.first().unwrap().train_loss;
        let last = trained.history.last().unwrap().train_loss;
        assert!(last < first);
        assert!(trained.history[0].validation_accuracy.is_some());
    }

    #[test]
    fn same_seed_gives_identical_weights() {
        let data = separable();
        let options = TrainOptions {
            epochs: 3,
            ..quick_options()
        };
        let a = train_spam_net(&data, &options, None).unwrap();
        let b = train_spam_net(&data, &options, None).unwrap();
        assert_eq!(a.net, b.net);
    }

    #[test]
    fn rejects_invalid_options_and_inputs() {
        let data = separable();
        let bad_lr = TrainOptions {
            learning_rate: f32::NAN,
            ..quick_options()
        };
        assert!(matches!(
            train_spam_net(&data, &bad_lr, None),
            Err(TrainingError::InvalidOptions(_))
        ));

        let mut mixed = separable();
        mixed.x.push(one_hot(5, 0));
        mixed.y.push(1.0);
        assert!(matches!(
            train_spam_net(&mixed, &quick_options(), None),
            Err(TrainingError::DimensionMismatch { expected: 4, actual: 5 })
        ));

        assert!(matches!(
            train_spam_net(&TrainDataset::default(), &quick_options(), None),
            Err(TrainingError::TooFewExamples { .. })
        ));
    }

    #[test]
    fn oversized_layers_are_rejected_before_allocation() {
        let huge = TrainOptions {
            hidden1: usize::MAX / 4,
            ..TrainOptions::default()
        };
        assert_eq!(huge.parameter_count(10), None);
        assert!(matches!(huge.validate(), Err(TrainingError::InvalidOptions(_))));
        assert!(matches!(
            train_spam_net(&separable(), &huge, None),
            Err(TrainingError::InvalidOptions(_))
        ));

        let wide_input = TrainOptions::default();
        wide_input.validate().unwrap();
        assert_eq!(wide_input.parameter_count(4), Some(4 * 128 + 128 + 128 * 64 + 64 + 64 + 1));
        assert!(wide_input.check_size(MAX_PARAMETERS).is_err());
    }

    #[test]
    fn evaluate_counts_boundary_as_spam() {
        let net = SpamNet::zeros(4, 2, 2);
        let data = TrainDataset {
            x: vec![one_hot(4, 0), one_hot(4, 1)],
            y: vec![1.0, 0.0],
        };
        let metrics = evaluate(&net, &data);
        assert_eq!(metrics.accuracy, 0.5);
        assert_eq!(metrics.spam_recall, 1.0);
        assert!((metrics.loss - std::f32::consts::LN_2).abs() < 1e-5);
    }
}
