// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Equi-depth histogram construction over sampled columns.
//!
//! Bucket boundaries are stored as strings; the histogram carries its
//! [`DataTypeTag`] so consumers can re-parse them. Counts are sample-level;
//! the per-bucket `row_count` field holds the bucket-local NDV estimate
//! scaled against the bucket's share of the full table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ndv::{NdvEstimator, NdvMethod};
use crate::profile::FrequencyProfile;
use crate::value::{DataTypeTag, SampleValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistogramType {
    #[serde(rename = "equi-depth")]
    EquiDepth,
    #[serde(rename = "singleton")]
    Singleton,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub min_value: String,
    pub max_value: String,
    /// Cumulative fraction of sample rows at the end of this bucket.
    pub cum_freq: f64,
    /// Estimated NDV inside the bucket.
    pub row_count: u64,
    /// Number of sample values that fell into the bucket.
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramStats {
    pub data_type: DataTypeTag,
    pub histogram_type: HistogramType,
    pub buckets: Vec<HistogramBucket>,
}

impl HistogramStats {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Δmax error metric: the worst absolute deviation of a bucket's sample
    /// count from the ideal equi-depth share of the table.
    pub fn delta_max_error(&self, table_rows: u64, bucket_len: usize) -> f64 {
        let ideal = table_rows as f64 / bucket_len as f64;
        self.buckets
            .iter()
            .map(|b| (b.size as f64 - ideal).abs())
            .fold(0.0, f64::max)
    }

    /// Re-bins a fresh sample against this histogram's boundaries, returning
    /// one count per bucket. Values outside every bucket are discarded.
    pub fn fit_to(&self, values: &[SampleValue]) -> Vec<u64> {
        let mut counts: BTreeMap<&SampleValue, u64> = BTreeMap::new();
        for v in values {
            *counts.entry(v).or_insert(0) += 1;
        }
        let ordered: Vec<(&SampleValue, u64)> = counts.into_iter().collect();

        let mut fits = Vec::with_capacity(self.buckets.len());
        let mut idx = 0;
        for bucket in &self.buckets {
            let bounds = self
                .data_type
                .parse(&bucket.min_value)
                .zip(self.data_type.parse(&bucket.max_value));
            let (min, max) = match bounds {
                Some(b) => b,
                None => {
                    fits.push(0);
                    continue;
                }
            };
            // Skip the gap below this bucket, then consume everything up to
            // its upper boundary.
            while idx < ordered.len() && *ordered[idx].0 < min {
                idx += 1;
            }
            let mut fit = 0;
            while idx < ordered.len() && *ordered[idx].0 <= max {
                fit += ordered[idx].1;
                idx += 1;
            }
            fits.push(fit);
        }
        fits
    }
}

/// Worst deviation of re-binned block counts from the ideal equi-depth share.
pub fn delta_error(block_sizes: &[u64], table_rows: u64, bucket_len: usize) -> f64 {
    let ideal = table_rows as f64 / bucket_len as f64;
    block_sizes
        .iter()
        .map(|&b| (b as f64 - ideal).abs())
        .fold(0.0, f64::max)
}

/// Buckets may grow to this multiple of the nominal equi-depth size before
/// they are closed, so a single heavy hitter does not shatter the layout.
const BUCKET_OVERFLOW_FACTOR: f64 = 1.5;

pub struct HistogramBuilder {
    table_rows: u64,
    bucket_len: usize,
}

impl HistogramBuilder {
    pub fn new(table_rows: u64, bucket_len: usize) -> HistogramBuilder {
        HistogramBuilder {
            table_rows,
            bucket_len: bucket_len.max(1),
        }
    }

    /// Builds the histogram for one column's non-null sample values.
    ///
    /// Zero-date markers are dropped for date columns. When the sampled
    /// distinct count fits the bucket budget the result is a singleton
    /// histogram, one bucket per value; otherwise distinct values are walked
    /// in order into equi-depth buckets.
    pub fn build(&self, values: &[SampleValue], data_type: DataTypeTag) -> HistogramStats {
        let mut counts: BTreeMap<&SampleValue, u64> = BTreeMap::new();
        let mut kept = 0u64;
        for v in values {
            if v.is_null_sentinel(data_type) {
                continue;
            }
            *counts.entry(v).or_insert(0) += 1;
            kept += 1;
        }

        if kept == 0 {
            return HistogramStats {
                data_type,
                histogram_type: HistogramType::EquiDepth,
                buckets: Vec::new(),
            };
        }

        let distinct: Vec<(&SampleValue, u64)> = counts.into_iter().collect();
        if distinct.len() <= self.bucket_len {
            return HistogramStats {
                data_type,
                histogram_type: HistogramType::Singleton,
                buckets: self.singleton_buckets(&distinct, kept),
            };
        }

        HistogramStats {
            data_type,
            histogram_type: HistogramType::EquiDepth,
            buckets: self.equi_depth_buckets(&distinct, kept),
        }
    }

    fn singleton_buckets(
        &self,
        distinct: &[(&SampleValue, u64)],
        total: u64,
    ) -> Vec<HistogramBucket> {
        let mut buckets = Vec::with_capacity(distinct.len());
        let mut running = 0u64;
        for (value, count) in distinct {
            running += count;
            let encoded = value.encode();
            buckets.push(HistogramBucket {
                min_value: encoded.clone(),
                max_value: encoded,
                cum_freq: running as f64 / total as f64,
                row_count: 1,
                size: *count,
            });
        }
        buckets
    }

    fn equi_depth_buckets(
        &self,
        distinct: &[(&SampleValue, u64)],
        total: u64,
    ) -> Vec<HistogramBucket> {
        let norm_size = (total as f64 / self.bucket_len as f64).ceil() as u64;
        let mut buckets = Vec::with_capacity(self.bucket_len + 1);
        let mut cum_freq = 0.0;
        let mut dv_idx = 0;

        for _ in 0..self.bucket_len {
            if dv_idx == distinct.len() {
                break;
            }
            let (bucket, next_idx) =
                self.fill_bucket(distinct, dv_idx, total, &mut cum_freq, Some(norm_size));
            buckets.push(bucket);
            dv_idx = next_idx;
        }

        // Whatever distinct values remain go into a single tail bucket.
        if dv_idx < distinct.len() {
            let (bucket, _) = self.fill_bucket(distinct, dv_idx, total, &mut cum_freq, None);
            buckets.push(bucket);
        }

        // Boundary contiguity: each value belongs to exactly one bucket, so a
        // bucket's upper boundary is rewritten to its successor's lower one.
        for i in 1..buckets.len() {
            let next_min = buckets[i].min_value.clone();
            if buckets[i - 1].max_value != next_min {
                buckets[i - 1].max_value = next_min;
            }
        }
        buckets
    }

    /// Accumulates distinct values from `start` into one bucket. A capacity
    /// of `None` consumes everything left (the tail bucket). The overflow
    /// check is skipped for a bucket's first value to tolerate heavy hitters.
    fn fill_bucket(
        &self,
        distinct: &[(&SampleValue, u64)],
        start: usize,
        total: u64,
        cum_freq: &mut f64,
        capacity: Option<u64>,
    ) -> (HistogramBucket, usize) {
        let mut idx = start;
        let mut size = 0u64;
        let mut local_counts = Vec::new();
        let min_value = distinct[start].0;
        let mut max_value = distinct[start].0;

        while idx < distinct.len() {
            let (value, count) = distinct[idx];
            let is_first = idx == start;
            if let Some(norm) = capacity {
                if !is_first && (size + count) as f64 > BUCKET_OVERFLOW_FACTOR * norm as f64 {
                    break;
                }
            }
            size += count;
            local_counts.push(count);
            max_value = value;
            idx += 1;
        }

        *cum_freq += size as f64 / total as f64;
        (
            HistogramBucket {
                min_value: min_value.encode(),
                max_value: max_value.encode(),
                cum_freq: *cum_freq,
                row_count: self.bucket_ndv(&local_counts, size, total),
                size,
            },
            idx,
        )
    }

    /// Bucket-local NDV: scale the bucket's sample share up to the table to
    /// get its notional row budget, then run GEE over the local profile,
    /// bounded by that budget. The scale factor truncates, matching how the
    /// budget is consumed downstream.
    fn bucket_ndv(&self, local_counts: &[u64], size: u64, total: u64) -> u64 {
        let correspond_size = (size as f64 / total as f64 * self.table_rows as f64) as u64;
        let profile = FrequencyProfile::from_value_counts(local_counts.iter().copied(), size as usize);
        let estimator = NdvEstimator::new(correspond_size);
        let est = estimator.estimate(size, &profile, NdvMethod::Gee);
        (est.min(correspond_size as f64) as u64).max(1)
    }
}
