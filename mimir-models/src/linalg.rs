// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Just enough dense linear algebra to run the inference graphs.

use serde::{Deserialize, Serialize};

/// A fully connected layer. `weight[out][in]`, row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub weight: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl Dense {
    pub fn output_len(&self) -> usize {
        self.weight.len()
    }

    pub fn input_len(&self) -> usize {
        self.weight.first().map(|r| r.len()).unwrap_or(0)
    }

    /// Checks the tensor is rectangular and the bias matches the output.
    pub fn validate(&self) -> Result<(), String> {
        let in_len = self.input_len();
        if self.weight.iter().any(|r| r.len() != in_len) {
            return Err("ragged weight matrix".to_string());
        }
        if self.bias.len() != self.weight.len() {
            return Err(format!(
                "bias length {} does not match {} output rows",
                self.bias.len(),
                self.weight.len()
            ));
        }
        Ok(())
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weight
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| dot(row, input) + b)
            .collect()
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn relu(values: &mut [f64]) {
    for v in values.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

/// Numerically stable softmax.
pub fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of the `k` largest scores, best first. Ties resolve to the lower
/// index.
pub fn top_k(scores: &[f64], k: usize) -> Vec<usize> {
    let mut idxs: Vec<usize> = (0..scores.len()).collect();
    idxs.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    idxs.truncate(k);
    idxs
}

/// Runs a stack of dense layers with ReLU between them (none after the last).
pub fn mlp_forward(layers: &[Dense], input: &[f64]) -> Vec<f64> {
    let mut x = input.to_vec();
    for (i, layer) in layers.iter().enumerate() {
        x = layer.forward(&x);
        if i + 1 < layers.len() {
            relu(&mut x);
        }
    }
    x
}
