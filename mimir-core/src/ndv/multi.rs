// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Joint NDV over column combinations.
//!
//! The tuple stream over the target columns is materialised from the joint
//! sample, profiled, and pushed through any single-column estimator. The
//! `block_split` variant extrapolates from the distinct-value growth rate
//! across fixed-size blocks instead.

use hashbrown::HashSet;
use itertools::Itertools;
use tracing::debug;

use crate::frame::DataFrame;
use crate::ndv::{NdvEstimator, NdvMethod};
use crate::profile::FrequencyProfile;
use crate::value::SampleValue;

/// How to estimate a column combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiColumnMethod {
    Estimator(NdvMethod),
    BlockSplit,
}

type TupleRow = Vec<Option<SampleValue>>;

const BLOCK_SIZE: usize = 100;
const SPLIT_GROUPS: usize = 10;

/// Joint NDV over `targets` in the sampled frame.
///
/// Columns missing from the sample are skipped; when none of the targets was
/// sampled the estimate degrades to 1.0, which biases the planner toward
/// over-estimating the cost of the combination.
pub fn estimate_multi_columns(
    frame: &DataFrame,
    targets: &[&str],
    table_rows: u64,
    method: MultiColumnMethod,
) -> f64 {
    let idxs: Vec<usize> = targets
        .iter()
        .filter_map(|name| {
            let idx = frame.resolve_column(name);
            if idx.is_none() {
                debug!(column = name, "target column absent from sample");
            }
            idx
        })
        .collect();
    if idxs.is_empty() {
        return 1.0;
    }

    let tuples = frame.project_tuples(&idxs);
    if tuples.len() < 2 {
        return super::INSUFFICIENT_NDV;
    }

    match method {
        MultiColumnMethod::BlockSplit => block_split_estimate(&tuples, table_rows),
        MultiColumnMethod::Estimator(m) => {
            let profile = FrequencyProfile::build(&tuples);
            NdvEstimator::new(table_rows).estimate(tuples.len() as u64, &profile, m)
        }
    }
}

/// Splits the tuple stream into fixed 100-row blocks, collapses duplicates
/// inside each block, then averages a split-rate extrapolation over 10
/// sequential groups of the collapsed stream.
pub fn block_split_estimate(tuples: &[TupleRow], table_rows: u64) -> f64 {
    if tuples.is_empty() {
        return super::INSUFFICIENT_NDV;
    }

    let mut collapsed: Vec<&TupleRow> = Vec::new();
    for block in tuples.chunks(BLOCK_SIZE) {
        collapsed.extend(collapse_block(block));
    }

    let sample_fraction = table_rows as f64 / tuples.len() as f64;
    let groups = split_into_groups(&collapsed, SPLIT_GROUPS);
    let estimates: Vec<f64> = groups
        .iter()
        .map(|g| estimate_with_split(g, sample_fraction))
        .collect();
    estimates.iter().sum::<f64>() / estimates.len() as f64
}

/// Collapses repeated tuples inside one block to a single occurrence,
/// preserving first-seen order.
fn collapse_block<'a>(block: &'a [TupleRow]) -> Vec<&'a TupleRow> {
    let mut seen: HashSet<&TupleRow> = HashSet::new();
    let mut distinct = Vec::new();
    for row in block {
        if seen.insert(row) {
            distinct.push(row);
        }
    }
    distinct
}

/// Splits a slice into `n` sequential groups whose sizes differ by at most
/// one. Falls back to a single group when there are fewer elements than
/// groups.
fn split_into_groups<'a>(rows: &[&'a TupleRow], n: usize) -> Vec<Vec<&'a TupleRow>> {
    if n > rows.len() {
        return vec![rows.to_vec()];
    }
    let group_size = rows.len() / n;
    let remainder = rows.len() % n;
    let mut result = Vec::with_capacity(n);
    let mut rest = rows;
    for i in 0..n {
        let size = group_size + usize::from(i < remainder);
        let (group, tail) = rest.split_at(size);
        result.push(group.to_vec());
        rest = tail;
    }
    result
}

/// Extrapolates group NDV from the growth between the first half and the
/// whole group. A growth rate under 1.1 means the group is saturated and its
/// observed distinct count is returned as-is.
fn estimate_with_split(group: &[&TupleRow], sample_fraction: f64) -> f64 {
    if group.is_empty() {
        return 0.0;
    }
    let half = if group.len() == 1 { 1 } else { group.len() / 2 };
    let ndv_half = group[..half].iter().unique().count() as f64;
    let ndv_total = group.iter().unique().count() as f64;
    if ndv_half == 0.0 {
        return ndv_total;
    }
    let rate = ndv_total / ndv_half;
    if rate < 1.1 {
        return ndv_total;
    }
    (ndv_total / sample_fraction) * (rate - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataFrame;
    use assert_approx_eq::assert_approx_eq;

    fn two_column_frame() -> DataFrame {
        let rows = (0..40i64)
            .map(|i| {
                vec![
                    Some(SampleValue::Int(i % 4)),
                    Some(SampleValue::Int(i % 10)),
                ]
            })
            .collect();
        DataFrame::from_rows(vec!["a".to_string(), "b".to_string()], rows).unwrap()
    }

    #[test]
    fn joint_ndv_sees_tuple_combinations() {
        let frame = two_column_frame();
        // (i % 4, i % 10) cycles with period lcm(4, 10) = 20, so 20 distinct
        // tuples, each seen twice.
        let ndv = estimate_multi_columns(
            &frame,
            &["a", "b"],
            40,
            MultiColumnMethod::Estimator(NdvMethod::Scale),
        );
        assert_approx_eq!(ndv, 20.0, 1e-9);
    }

    #[test]
    fn missing_columns_are_skipped() {
        let frame = two_column_frame();
        let ndv = estimate_multi_columns(
            &frame,
            &["a", "ghost"],
            40,
            MultiColumnMethod::Estimator(NdvMethod::Scale),
        );
        // Only "a" survives: 4 distinct, sample covers the whole table.
        assert_approx_eq!(ndv, 4.0, 1e-9);
    }

    #[test]
    fn no_sampled_target_degrades_to_one() {
        let frame = two_column_frame();
        let ndv = estimate_multi_columns(
            &frame,
            &["x", "y"],
            40,
            MultiColumnMethod::Estimator(NdvMethod::Gee),
        );
        assert_approx_eq!(ndv, 1.0, 1e-9);
    }

    #[test]
    fn uppercase_targets_resolve() {
        let frame = two_column_frame();
        let ndv = estimate_multi_columns(
            &frame,
            &["A"],
            40,
            MultiColumnMethod::Estimator(NdvMethod::Scale),
        );
        assert_approx_eq!(ndv, 4.0, 1e-9);
    }

    #[test]
    fn saturated_groups_return_observed_count() {
        // One value everywhere: every group saturates, the mean stays 1.
        let tuples: Vec<TupleRow> = (0..200)
            .map(|_| vec![Some(SampleValue::Int(7))])
            .collect();
        let ndv = block_split_estimate(&tuples, 1_000_000);
        assert_approx_eq!(ndv, 1.0, 1e-9);
    }

    #[test]
    fn group_split_sizes_balance() {
        let tuples: Vec<TupleRow> = (0..23).map(|i| vec![Some(SampleValue::Int(i))]).collect();
        let refs: Vec<&TupleRow> = tuples.iter().collect();
        let groups = split_into_groups(&refs, 10);
        assert_eq!(groups.len(), 10);
        let sizes: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 23);
        assert!(sizes.iter().all(|&s| s == 2 || s == 3));
    }
}
