// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! PLM4NDV: NDV regression from pretrained column-description embeddings.
//!
//! Each column's `(name, type)` description is embedded to a 768-d vector by
//! an external sentence encoder, one multi-head self-attention layer
//! contextualises the columns of a table against each other, and a small head
//! regresses log-NDV from the residual embedding, log table size and the
//! profile. Dropout layers from training are identity at inference.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use mimir_core::error::{StatsError, StatsResult};
use mimir_core::profile::FrequencyProfile;

use crate::linalg::{mlp_forward, softmax, Dense};

pub const EMB_SIZE: usize = 768;
pub const PROFILE_SIZE: usize = 100;
pub const NUM_HEADS: usize = 8;
const HEAD_DIM: usize = EMB_SIZE / NUM_HEADS;

/// Produces 768-d embeddings of column descriptions. The production encoder
/// is an external collaborator (a sentence-transformer service); tests use
/// [`HashProjectionEncoder`].
pub trait SentenceEncoder: Send + Sync {
    fn encode(&self, description: &str) -> Vec<f64>;
}

/// Deterministic stand-in encoder: projects the description's hash through a
/// xorshift stream into [-1, 1]^768. Useful for tests and offline smoke runs.
pub struct HashProjectionEncoder;

impl SentenceEncoder for HashProjectionEncoder {
    fn encode(&self, description: &str) -> Vec<f64> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        description.hash(&mut hasher);
        let mut state = hasher.finish() | 1;
        (0..EMB_SIZE)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state as f64 / u64::MAX as f64) * 2.0 - 1.0
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttentionWeights {
    pub query: Dense,
    pub key: Dense,
    pub value: Dense,
    pub fc_out: Dense,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plm4NdvWeights {
    pub attention: Vec<AttentionWeights>,
    pub head: Vec<Dense>,
}

#[derive(Debug)]
pub struct Plm4NdvModel {
    weights: Plm4NdvWeights,
    use_sample: bool,
}

/// Per-column model input.
pub struct ColumnInput<'a> {
    pub name: &'a str,
    pub column_type: &'a str,
    pub table_rows: u64,
    pub profile: &'a FrequencyProfile,
}

impl ColumnInput<'_> {
    fn description(&self) -> String {
        format!("{}, {}", self.name, self.column_type)
    }

    fn fallback(&self) -> f64 {
        2.0 * self.profile.distinct() as f64
    }
}

impl Plm4NdvModel {
    pub fn load(path: &Path, use_sample: bool) -> StatsResult<Plm4NdvModel> {
        let raw = fs::read_to_string(path)
            .map_err(|e| StatsError::ModelLoad(format!("{}: {e}", path.display())))?;
        let weights: Plm4NdvWeights = serde_json::from_str(&raw)
            .map_err(|e| StatsError::ModelLoad(format!("{}: {e}", path.display())))?;
        Plm4NdvModel::from_weights(weights, use_sample)
    }

    pub fn from_weights(weights: Plm4NdvWeights, use_sample: bool) -> StatsResult<Plm4NdvModel> {
        if weights.attention.is_empty() || weights.head.is_empty() {
            return Err(StatsError::ModelLoad(
                "attention stack and head must be non-empty".to_string(),
            ));
        }
        for att in &weights.attention {
            for (name, layer) in [
                ("query", &att.query),
                ("key", &att.key),
                ("value", &att.value),
                ("fc_out", &att.fc_out),
            ] {
                layer
                    .validate()
                    .map_err(|e| StatsError::ModelLoad(format!("attention {name}: {e}")))?;
                if layer.input_len() != EMB_SIZE || layer.output_len() != EMB_SIZE {
                    return Err(StatsError::ModelLoad(format!(
                        "attention {name} must be {EMB_SIZE}x{EMB_SIZE}"
                    )));
                }
            }
        }
        let head_input = if use_sample {
            EMB_SIZE + 1 + PROFILE_SIZE
        } else {
            EMB_SIZE + 1
        };
        let head = &weights.head;
        if head[0].input_len() != head_input || head.last().unwrap().output_len() != 1 {
            return Err(StatsError::ModelLoad(
                "head shapes do not match the PLM4NDV architecture".to_string(),
            ));
        }
        Ok(Plm4NdvModel {
            weights,
            use_sample,
        })
    }

    /// Predicts NDV for every column of a table at once. Any failure (bad
    /// encoder output, degenerate input) degrades that table to the 2·d
    /// fallback, column by column.
    pub fn predict_table(
        &self,
        encoder: &dyn SentenceEncoder,
        columns: &[ColumnInput<'_>],
    ) -> Vec<f64> {
        match self.forward(encoder, columns) {
            Ok(preds) => preds,
            Err(e) => {
                tracing::warn!(error = %e, "PLM4NDV inference failed, using 2d fallback");
                columns.iter().map(|c| c.fallback()).collect()
            }
        }
    }

    fn forward(
        &self,
        encoder: &dyn SentenceEncoder,
        columns: &[ColumnInput<'_>],
    ) -> StatsResult<Vec<f64>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings: Vec<Vec<f64>> = columns
            .iter()
            .map(|c| encoder.encode(&c.description()))
            .collect();
        if embeddings.iter().any(|e| e.len() != EMB_SIZE) {
            return Err(StatsError::ModelLoad(format!(
                "encoder must produce {EMB_SIZE}-d embeddings"
            )));
        }

        let mut contextualised = embeddings.clone();
        for att in &self.weights.attention {
            contextualised = self_attention(att, &contextualised);
        }

        let mut out = Vec::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            // Residual connection: the head sees emb + attended.
            let mut x: Vec<f64> = embeddings[i]
                .iter()
                .zip(&contextualised[i])
                .map(|(e, a)| e + a)
                .collect();
            x.push((col.table_rows.max(1) as f64).ln());
            if self.use_sample {
                // profile entries f_1..=f_100; f_0 is a placeholder.
                x.extend((1..=PROFILE_SIZE).map(|j| col.profile.f(j) as f64));
            }
            let log_d = mlp_forward(&self.weights.head, &x)[0];
            out.push(log_d.exp());
        }
        Ok(out)
    }
}

/// Multi-head scaled dot-product self-attention over the column sequence.
/// With a single table (no padding) the attention mask is all-ones and drops
/// out of the computation.
fn self_attention(att: &AttentionWeights, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let seq_len = inputs.len();
    let q: Vec<Vec<f64>> = inputs.iter().map(|x| att.query.forward(x)).collect();
    let k: Vec<Vec<f64>> = inputs.iter().map(|x| att.key.forward(x)).collect();
    let v: Vec<Vec<f64>> = inputs.iter().map(|x| att.value.forward(x)).collect();

    let scale = (HEAD_DIM as f64).sqrt();
    let mut merged = vec![vec![0.0; EMB_SIZE]; seq_len];
    for head in 0..NUM_HEADS {
        let lo = head * HEAD_DIM;
        let hi = lo + HEAD_DIM;
        for i in 0..seq_len {
            let scores: Vec<f64> = (0..seq_len)
                .map(|j| {
                    q[i][lo..hi]
                        .iter()
                        .zip(&k[j][lo..hi])
                        .map(|(a, b)| a * b)
                        .sum::<f64>()
                        / scale
                })
                .collect();
            let weights = softmax(&scores);
            for (j, w) in weights.iter().enumerate() {
                for (slot, value) in merged[i][lo..hi].iter_mut().zip(&v[j][lo..hi]) {
                    *slot += w * value;
                }
            }
        }
    }

    merged.iter().map(|row| att.fc_out.forward(row)).collect()
}
