// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! AdaNDV: a learned ensemble over the closed-form estimator palette.
//!
//! Two ranker heads score the palette as over- and under-estimators; the
//! top-k of each side are kept, a weighter head softmax-weights the 2k chosen
//! log-estimates, and the final estimate is the exponentiated weighted sum.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use mimir_core::error::{StatsError, StatsResult};
use mimir_core::ndv::{NdvEstimator, NdvMethod};
use mimir_core::profile::FrequencyProfile;

use crate::linalg::{mlp_forward, softmax, top_k, Dense};

/// The profile is truncated or zero-padded to this many entries before the
/// three log features are appended.
pub const PROFILE_PAD: usize = 97;
pub const MODEL_INPUT_LEN: usize = PROFILE_PAD + 3;
/// Palette size the rankers score, see [`NdvMethod::ENSEMBLE_PALETTE`].
pub const ESTIMATOR_NUM: usize = 9;
/// Each ranker contributes its top-k estimators.
pub const TOP_K: usize = 2;
/// Estimator outputs are clipped here before the log.
pub const LOG_CLIP: f64 = 1e-5;

#[derive(Debug, Clone, Deserialize)]
pub struct AdaNdvWeights {
    pub ranker_over: Vec<Dense>,
    pub ranker_under: Vec<Dense>,
    pub weighter: Vec<Dense>,
}

#[derive(Debug)]
pub struct AdaNdvModel {
    weights: AdaNdvWeights,
}

impl AdaNdvModel {
    pub fn load(path: &Path) -> StatsResult<AdaNdvModel> {
        let raw = fs::read_to_string(path)
            .map_err(|e| StatsError::ModelLoad(format!("{}: {e}", path.display())))?;
        let weights: AdaNdvWeights = serde_json::from_str(&raw)
            .map_err(|e| StatsError::ModelLoad(format!("{}: {e}", path.display())))?;
        AdaNdvModel::from_weights(weights)
    }

    pub fn from_weights(weights: AdaNdvWeights) -> StatsResult<AdaNdvModel> {
        for (name, stack) in [
            ("ranker_over", &weights.ranker_over),
            ("ranker_under", &weights.ranker_under),
            ("weighter", &weights.weighter),
        ] {
            if stack.is_empty() {
                return Err(StatsError::ModelLoad(format!("{name} has no layers")));
            }
            for layer in stack.iter() {
                layer
                    .validate()
                    .map_err(|e| StatsError::ModelLoad(format!("{name}: {e}")))?;
            }
        }
        let w = &weights;
        if w.ranker_over[0].input_len() != MODEL_INPUT_LEN
            || w.ranker_over.last().unwrap().output_len() != ESTIMATOR_NUM
            || w.ranker_under.last().unwrap().output_len() != ESTIMATOR_NUM
            || w.weighter[0].input_len() != MODEL_INPUT_LEN + 2 * TOP_K
            || w.weighter.last().unwrap().output_len() != 2 * TOP_K
        {
            return Err(StatsError::ModelLoad(
                "weight shapes do not match the AdaNDV architecture".to_string(),
            ));
        }
        Ok(AdaNdvModel { weights })
    }

    /// Runs the palette and the ensemble for one column.
    pub fn estimate(
        &self,
        table_rows: u64,
        sample_rows: u64,
        profile: &FrequencyProfile,
    ) -> f64 {
        let estimator = NdvEstimator::new(table_rows);
        let estimates: Vec<f64> = NdvMethod::ENSEMBLE_PALETTE
            .iter()
            .map(|&m| estimator.estimate(sample_rows, profile, m))
            .collect();
        self.predict(profile, table_rows, &estimates)
    }

    /// The ensemble forward pass over precomputed palette estimates.
    pub fn predict(&self, profile: &FrequencyProfile, table_rows: u64, estimates: &[f64]) -> f64 {
        let x = build_input(profile, table_rows);

        let over_scores = mlp_forward(&self.weights.ranker_over, &x);
        let under_scores = mlp_forward(&self.weights.ranker_under, &x);
        let over_idxs = top_k(&over_scores, TOP_K);
        let under_idxs = top_k(&under_scores, TOP_K);

        let log_est: Vec<f64> = estimates.iter().map(|&e| e.max(LOG_CLIP).ln()).collect();
        let chosen: Vec<f64> = over_idxs
            .iter()
            .chain(&under_idxs)
            .map(|&i| log_est[i])
            .collect();

        let mut weighter_input = x;
        weighter_input.extend_from_slice(&chosen);
        let logits = mlp_forward(&self.weights.weighter, &weighter_input);
        let weights = softmax(&logits);

        let log_d: f64 = chosen.iter().zip(&weights).map(|(e, w)| e * w).sum();
        log_d.exp()
    }
}

/// `[f truncated/zero-padded to 97, log n, log d, log N]`, with n and d
/// recovered from the padded profile.
pub fn build_input(profile: &FrequencyProfile, table_rows: u64) -> Vec<f64> {
    let mut x: Vec<f64> = (0..PROFILE_PAD).map(|j| profile.f(j) as f64).collect();
    let n: f64 = x.iter().enumerate().map(|(j, &f)| j as f64 * f).sum();
    let d: f64 = x.iter().sum();
    x.push(n.max(1.0).ln());
    x.push(d.max(1.0).ln());
    x.push((table_rows.max(1) as f64).ln());
    x
}
