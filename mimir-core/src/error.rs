// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use thiserror::Error;

/// Error kinds surfaced by the statistics pipeline.
///
/// Only `Configuration` is fatal at the caller level. Every other kind is
/// absorbed inside the component that produced it and surfaced as an
/// annotation on the final [`crate::stats::TableStatistics`] record.
#[derive(Debug, Error)]
pub enum StatsError {
    /// Catalog probe failed; the sampler falls through to the non-PK path.
    #[error("table metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// An individual block query failed; sampling continues with the rows
    /// already collected.
    #[error("query failed: {0}")]
    Query(String),

    /// Fewer than 2 rows collected. NDV defaults to the 0.01 sentinel and the
    /// histogram stays empty.
    #[error("insufficient sample: fewer than 2 rows collected")]
    InsufficientSample,

    /// Zero denominator, non-convergent root-find, or a comparable numeric
    /// precondition failure inside an estimator.
    #[error("estimator numeric failure: {0}")]
    EstimatorNumeric(&'static str),

    /// Learned model weights absent or corrupt.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// Unknown method name or otherwise invalid configuration. Fatal.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type StatsResult<T> = Result<T, StatsError>;
