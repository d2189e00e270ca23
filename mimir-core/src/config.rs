// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StatsResult;
use crate::ndv::NdvMethod;

/// Knobs recognised by the statistics pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Target bucket count k for equi-depth histograms.
    pub bucket_len: usize,
    /// NDV method key, e.g. "GEE", "Chao", "Ada".
    pub ndv_method: String,
    /// Sampler row budget R.
    pub rows_target: u64,
    /// 2PHASE target per-bucket error δ_req.
    pub delta_req: f64,
    /// Recursion depth for sort-and-validate.
    pub lmax: u32,
    /// Absolute cap on total sampled rows across adaptive extensions.
    pub max_sample_rows: u64,
    /// Whether PLM4NDV consumes the profile input.
    pub use_sample: bool,
    pub adandv_model_path: Option<PathBuf>,
    pub plm4ndv_model_path: Option<PathBuf>,
    pub ls_model_path: Option<PathBuf>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            bucket_len: 10,
            ndv_method: "GEE".to_string(),
            rows_target: 10_000,
            delta_req: 0.1,
            lmax: 4,
            max_sample_rows: 200_000,
            use_sample: true,
            adandv_model_path: None,
            plm4ndv_model_path: None,
            ls_model_path: None,
        }
    }
}

impl StatsConfig {
    /// Parses `ndv_method`. Unknown keys are a fatal configuration error.
    pub fn method(&self) -> StatsResult<NdvMethod> {
        NdvMethod::parse(&self.ndv_method)
    }
}
