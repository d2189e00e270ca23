// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The LS profile regressor: a learned `profile-predict` over `(f, N)`.
//!
//! Serves the "LS" method key. The regressor shares the AdaNDV input layout
//! and predicts log-NDV directly; callers fall back to GEE when no weights
//! are installed.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use mimir_core::error::{StatsError, StatsResult};
use mimir_core::profile::FrequencyProfile;

use crate::adandv::{build_input, MODEL_INPUT_LEN};
use crate::linalg::{mlp_forward, Dense};

#[derive(Debug, Clone, Deserialize)]
pub struct LsWeights {
    pub layers: Vec<Dense>,
}

#[derive(Debug)]
pub struct LsModel {
    weights: LsWeights,
}

impl LsModel {
    pub fn load(path: &Path) -> StatsResult<LsModel> {
        let raw = fs::read_to_string(path)
            .map_err(|e| StatsError::ModelLoad(format!("{}: {e}", path.display())))?;
        let weights: LsWeights = serde_json::from_str(&raw)
            .map_err(|e| StatsError::ModelLoad(format!("{}: {e}", path.display())))?;
        LsModel::from_weights(weights)
    }

    pub fn from_weights(weights: LsWeights) -> StatsResult<LsModel> {
        if weights.layers.is_empty() {
            return Err(StatsError::ModelLoad("LS regressor has no layers".to_string()));
        }
        for layer in &weights.layers {
            layer
                .validate()
                .map_err(|e| StatsError::ModelLoad(format!("LS: {e}")))?;
        }
        if weights.layers[0].input_len() != MODEL_INPUT_LEN
            || weights.layers.last().unwrap().output_len() != 1
        {
            return Err(StatsError::ModelLoad(
                "LS weight shapes do not match the regressor architecture".to_string(),
            ));
        }
        Ok(LsModel { weights })
    }

    /// `profile_predict(f, N)`: regress log-NDV from the padded profile.
    pub fn predict(&self, profile: &FrequencyProfile, table_rows: u64) -> f64 {
        let x = build_input(profile, table_rows);
        mlp_forward(&self.weights.layers, &x)[0].exp()
    }
}
