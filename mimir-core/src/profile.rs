// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Frequency profiles: the canonical lossless input to every NDV estimator.

use std::hash::Hash;

use hashbrown::HashMap;

use crate::error::{StatsError, StatsResult};

/// The frequency profile `f` of a sample of size n.
///
/// `f[j]` is the number of distinct values that appear exactly `j` times in
/// the sample; `f[0]` is a reserved placeholder and stays 0. The vector has
/// length n+1, so the invariants `Σ j·f_j = n` and `Σ f_j = d` (observed
/// distinct count) hold by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyProfile {
    counts: Vec<u64>,
}

impl FrequencyProfile {
    /// Builds the profile of a slice in O(n) time and O(d) auxiliary space.
    pub fn build<T: Eq + Hash>(values: &[T]) -> FrequencyProfile {
        let mut occurrences: HashMap<&T, u64> = HashMap::new();
        for v in values {
            *occurrences.entry(v).or_insert(0) += 1;
        }
        let mut counts = vec![0u64; values.len() + 1];
        for (_, c) in occurrences {
            counts[c as usize] += 1;
        }
        FrequencyProfile { counts }
    }

    /// Builds a profile directly from per-value occurrence counts, e.g. the
    /// contents of one histogram bucket. `sample_size` must equal the sum of
    /// the counts.
    pub fn from_value_counts<I>(value_counts: I, sample_size: usize) -> FrequencyProfile
    where
        I: IntoIterator<Item = u64>,
    {
        let mut counts = vec![0u64; sample_size + 1];
        for c in value_counts {
            counts[c as usize] += 1;
        }
        FrequencyProfile { counts }
    }

    /// `f_j`, zero outside the stored range.
    pub fn f(&self, j: usize) -> u64 {
        self.counts.get(j).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Length of the underlying vector (n + 1 for a built profile).
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.len() <= 1
    }

    /// Observed distinct count d = Σ f_j.
    pub fn distinct(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Recovered sample size n = Σ j·f_j.
    pub fn sample_size(&self) -> u64 {
        self.counts
            .iter()
            .enumerate()
            .map(|(j, &f)| j as u64 * f)
            .sum()
    }

    pub fn singletons(&self) -> u64 {
        self.f(1)
    }

    pub fn doubletons(&self) -> u64 {
        self.f(2)
    }

    /// The non-zero entries of f, in index order. Used by the Chao-Lee
    /// coefficient-of-variation term.
    pub fn nonzero(&self) -> Vec<u64> {
        self.counts.iter().copied().filter(|&c| c != 0).collect()
    }
}

/// q-error between an estimate and the ground truth: `max/min` of the two.
/// Both arguments must be strictly positive.
pub fn q_error(estimated: f64, ground_truth: f64) -> StatsResult<f64> {
    if estimated <= 0.0 || ground_truth <= 0.0 {
        return Err(StatsError::EstimatorNumeric(
            "q-error requires positive estimate and ground truth",
        ));
    }
    Ok(estimated.max(ground_truth) / estimated.min(ground_truth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SampleValue;

    #[test]
    fn round_trip_invariants() {
        let data: Vec<i64> = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 1, 2];
        let profile = FrequencyProfile::build(&data);
        assert_eq!(profile.len(), data.len() + 1);
        assert_eq!(profile.f(0), 0);
        assert_eq!(profile.sample_size(), data.len() as u64);
        assert_eq!(profile.distinct(), 10);
        assert_eq!(profile.singletons(), 8);
        assert_eq!(profile.doubletons(), 2);
    }

    #[test]
    fn profile_over_sample_values() {
        let data = vec![
            SampleValue::Str("a".to_string()),
            SampleValue::Str("a".to_string()),
            SampleValue::Str("b".to_string()),
        ];
        let profile = FrequencyProfile::build(&data);
        assert_eq!(profile.distinct(), 2);
        assert_eq!(profile.f(2), 1);
    }

    #[test]
    fn from_value_counts_matches_build() {
        let data: Vec<i64> = vec![7, 7, 7, 8, 9];
        let built = FrequencyProfile::build(&data);
        let direct = FrequencyProfile::from_value_counts([3u64, 1, 1], data.len());
        assert_eq!(built, direct);
    }

    #[test]
    fn empty_profile() {
        let profile = FrequencyProfile::build::<i64>(&[]);
        assert!(profile.is_empty());
        assert_eq!(profile.distinct(), 0);
    }

    #[test]
    fn q_error_is_symmetric() {
        assert_eq!(q_error(10.0, 100.0).unwrap(), 10.0);
        assert_eq!(q_error(100.0, 10.0).unwrap(), 10.0);
        assert!(q_error(0.0, 10.0).is_err());
    }
}
