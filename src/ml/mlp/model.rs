use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::features::SparseVector;

/// Probabilities at or above this value are spam.
pub const SPAM_THRESHOLD: f32 = 0.5;

/// Current on-disk layout of [`SpamNet`].
pub const MODEL_VERSION: i64 = 1;

/// Decision rule shared by every caller; the boundary itself counts as spam.
pub fn is_spam_probability(probability: f32) -> bool {
    probability >= SPAM_THRESHOLD
}

pub fn sigmoid(z: f32) -> f32 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Fully connected layer with row-major weights (`output * inputs + input`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl Dense {
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            inputs,
            outputs,
            weights: vec![0.0; inputs * outputs],
            bias: vec![0.0; outputs],
        }
    }

    /// Glorot-uniform weights and zero biases.
    pub fn glorot<R: Rng>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let mut layer = Self::zeros(inputs, outputs);
        let limit = (6.0 / (inputs + outputs).max(1) as f32).sqrt();
        for w in &mut layer.weights {
            *w = (rng.random::<f32>() * 2.0 - 1.0) * limit;
        }
        layer
    }

    fn forward_dense(&self, input: &[f32], out: &mut [f32]) {
        for o in 0..self.outputs {
            let base = o * self.inputs;
            let row = &self.weights[base..base + self.inputs];
            out[o] = self.bias[o] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>();
        }
    }

    fn forward_sparse(&self, input: &SparseVector, out: &mut [f32]) {
        for o in 0..self.outputs {
            let base = o * self.inputs;
            let mut sum = self.bias[o];
            for (i, value) in input.iter() {
                sum += self.weights[base + i] * value;
            }
            out[o] = sum;
        }
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.inputs == 0 || self.outputs == 0 {
            return Err(format!("{name} has an empty shape"));
        }
        if self.weights.len() != self.inputs * self.outputs {
            return Err(format!("{name} weights length mismatch"));
        }
        if self.bias.len() != self.outputs {
            return Err(format!("{name} bias length mismatch"));
        }
        if self.weights.iter().chain(&self.bias).any(|v| !v.is_finite()) {
            return Err(format!("{name} contains non-finite parameters"));
        }
        Ok(())
    }
}

/// `input -> dense(ReLU) -> dropout -> dense(ReLU) -> dense(sigmoid)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamNet {
    pub model_version: i64,
    pub input_dim: usize,
    pub hidden1: Dense,
    pub hidden2: Dense,
    pub output: Dense,
    /// Dropout rate applied after `hidden1` while training. Inference ignores it.
    pub dropout: f32,
}

/// Intermediate values of one forward pass, reused across samples.
#[derive(Debug, Clone)]
pub(super) struct Activations {
    pub z1: Vec<f32>,
    pub a1: Vec<f32>,
    pub z2: Vec<f32>,
    pub a2: Vec<f32>,
}

impl Activations {
    pub fn new(net: &SpamNet) -> Self {
        Self {
            z1: vec![0.0; net.hidden1.outputs],
            a1: vec![0.0; net.hidden1.outputs],
            z2: vec![0.0; net.hidden2.outputs],
            a2: vec![0.0; net.hidden2.outputs],
        }
    }
}

impl SpamNet {
    /// Network with every parameter set to zero; it predicts exactly 0.5 for any input.
    pub fn zeros(input_dim: usize, hidden1: usize, hidden2: usize) -> Self {
        Self {
            model_version: MODEL_VERSION,
            input_dim,
            hidden1: Dense::zeros(input_dim, hidden1),
            hidden2: Dense::zeros(hidden1, hidden2),
            output: Dense::zeros(hidden2, 1),
            dropout: 0.0,
        }
    }

    pub fn glorot<R: Rng>(
        input_dim: usize,
        hidden1: usize,
        hidden2: usize,
        dropout: f32,
        rng: &mut R,
    ) -> Self {
        Self {
            model_version: MODEL_VERSION,
            input_dim,
            hidden1: Dense::glorot(input_dim, hidden1, rng),
            hidden2: Dense::glorot(hidden1, hidden2, rng),
            output: Dense::glorot(hidden2, 1, rng),
            dropout,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model_version != MODEL_VERSION {
            return Err(format!(
                "Unsupported model_version {} (expected {})",
                self.model_version, MODEL_VERSION
            ));
        }
        self.hidden1.validate("hidden1")?;
        self.hidden2.validate("hidden2")?;
        self.output.validate("output")?;
        if self.hidden1.inputs != self.input_dim {
            return Err("hidden1 input size does not match input_dim".to_string());
        }
        if self.hidden2.inputs != self.hidden1.outputs {
            return Err("hidden2 input size does not match hidden1 output".to_string());
        }
        if self.output.inputs != self.hidden2.outputs || self.output.outputs != 1 {
            return Err("output layer must map hidden2 to a single unit".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err("dropout must be in [0, 1)".to_string());
        }
        Ok(())
    }

    /// Spam probability for one feature row, or `None` if its dimensionality is wrong.
    pub fn predict_proba(&self, features: &SparseVector) -> Option<f32> {
        if features.dim != self.input_dim {
            return None;
        }
        let mut acts = Activations::new(self);
        Some(self.forward_into(features, None, &mut acts))
    }

    /// Forward pass; `mask` scales the first hidden layer (dropout) when training.
    pub(super) fn forward_into(
        &self,
        features: &SparseVector,
        mask: Option<&[f32]>,
        acts: &mut Activations,
    ) -> f32 {
        self.hidden1.forward_sparse(features, &mut acts.z1);
        for (h, (a, &z)) in acts.a1.iter_mut().zip(&acts.z1).enumerate() {
            *a = z.max(0.0) * mask.map_or(1.0, |m| m[h]);
        }
        self.hidden2.forward_dense(&acts.a1, &mut acts.z2);
        for (a, &z) in acts.a2.iter_mut().zip(&acts.z2) {
            *a = z.max(0.0);
        }
        let mut logit = [0.0f32];
        self.output.forward_dense(&acts.a2, &mut logit);
        sigmoid(logit[0])
    }
}
