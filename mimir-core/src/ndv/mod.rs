// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The NDV estimator suite.
//!
//! Every method maps `(n, N, f)`, that is sample size, table size and
//! frequency profile, to an estimate of the number of distinct values in the
//! full table. Methods are pure; fallbacks on numeric precondition failures go to
//! the `scale` estimator for algebraic blow-ups and to the observed distinct
//! count for non-convergent root-finds.

pub mod multi;
mod solve;

use tracing::debug;

use crate::error::{StatsError, StatsResult};
use crate::profile::FrequencyProfile;
use solve::{find_root, linspace, ln_gamma, min_positive_root};

/// Positive sentinel returned when fewer than 2 rows were collected, so
/// downstream selectivity math never divides by zero.
pub const INSUFFICIENT_NDV: f64 = 0.01;

/// Method keys, spelled the way callers configure them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NdvMethod {
    Scale,
    ErrorBound,
    Gee,
    Chao,
    Shlosser,
    ChaoLee,
    Jackknife,
    Sichel,
    Goodman,
    Moments,
    MomentsV2,
    MomentsV3,
    HorvitzThompson,
    Bootstrap,
    SmoothedJackknife,
    /// Learned profile regressor (external-library stand-in).
    Ls,
    /// Learned over/under ranker ensemble.
    Ada,
    /// Learned per-table column-embedding regressor.
    Plm,
}

impl NdvMethod {
    pub fn parse(key: &str) -> StatsResult<NdvMethod> {
        let method = match key {
            "scale" => NdvMethod::Scale,
            "error_bound" => NdvMethod::ErrorBound,
            "GEE" => NdvMethod::Gee,
            "Chao" => NdvMethod::Chao,
            "shlosser" => NdvMethod::Shlosser,
            "ChaoLee" => NdvMethod::ChaoLee,
            "Jackknife" => NdvMethod::Jackknife,
            "Sichel" => NdvMethod::Sichel,
            "Goodman" => NdvMethod::Goodman,
            // Both spellings survive in the wild.
            "Method of Moments" | "Method of Movement" => NdvMethod::Moments,
            "Method of Moments v2" | "Method of Movement v2" => NdvMethod::MomentsV2,
            "Method of Moments v3" | "Method of Movement v3" => NdvMethod::MomentsV3,
            "Horvitz Thompson" => NdvMethod::HorvitzThompson,
            "Bootstrap" => NdvMethod::Bootstrap,
            "Smoothed Jackknife" => NdvMethod::SmoothedJackknife,
            "LS" => NdvMethod::Ls,
            "Ada" => NdvMethod::Ada,
            "PLM" => NdvMethod::Plm,
            other => {
                return Err(StatsError::Configuration(format!(
                    "unsupported NDV estimation method: {other}"
                )))
            }
        };
        Ok(method)
    }

    /// Learned methods need model weights and are dispatched outside this
    /// crate; everything else is closed-form.
    pub fn is_learned(&self) -> bool {
        matches!(self, NdvMethod::Ls | NdvMethod::Ada | NdvMethod::Plm)
    }

    /// The palette the learned over/under rankers choose from.
    pub const ENSEMBLE_PALETTE: [NdvMethod; 9] = [
        NdvMethod::ErrorBound,
        NdvMethod::Gee,
        NdvMethod::Chao,
        NdvMethod::Shlosser,
        NdvMethod::ChaoLee,
        NdvMethod::Jackknife,
        NdvMethod::Sichel,
        NdvMethod::Moments,
        NdvMethod::Bootstrap,
    ];
}

/// Closed-form estimator suite bound to one table size N.
#[derive(Debug, Clone, Copy)]
pub struct NdvEstimator {
    table_rows: u64,
}

impl NdvEstimator {
    pub fn new(table_rows: u64) -> NdvEstimator {
        NdvEstimator { table_rows }
    }

    pub fn table_rows(&self) -> u64 {
        self.table_rows
    }

    /// Estimates NDV from a sample of `sample_rows` rows with profile f.
    ///
    /// The result is raised to the observed distinct count and capped at the
    /// table size. Samples of fewer than 2 rows yield [`INSUFFICIENT_NDV`].
    /// Learned method keys degrade to GEE here; callers wanting the learned
    /// paths dispatch them before reaching this function.
    pub fn estimate(&self, sample_rows: u64, profile: &FrequencyProfile, method: NdvMethod) -> f64 {
        let d = profile.distinct() as f64;
        if sample_rows < 2 || d == 0.0 {
            return INSUFFICIENT_NDV;
        }
        if self.table_rows == 0 {
            return d;
        }
        let n = sample_rows as f64;
        let est = match method {
            NdvMethod::Scale => self.scale(n, profile),
            NdvMethod::ErrorBound => self.error_bound(n, profile),
            NdvMethod::Gee => self.gee(n, profile),
            NdvMethod::Chao => self.chao(n, profile),
            NdvMethod::Shlosser => self.shlosser(n, profile),
            NdvMethod::ChaoLee => self.chao_lee(n, profile),
            NdvMethod::Jackknife => self.jackknife(n, profile),
            NdvMethod::Sichel => self.sichel(n, profile),
            NdvMethod::Goodman => self.goodman(n, profile),
            NdvMethod::Moments => self.moments_v1(n, profile),
            NdvMethod::MomentsV2 => self.moments_v2(n, profile),
            NdvMethod::MomentsV3 => self.moments_v3(n, profile),
            NdvMethod::HorvitzThompson => self.horvitz_thompson(n, profile),
            NdvMethod::Bootstrap => self.bootstrap(n, profile),
            NdvMethod::SmoothedJackknife => self.smoothed_jackknife(n, profile),
            NdvMethod::Ls | NdvMethod::Ada | NdvMethod::Plm => {
                debug!(?method, "learned method reached closed-form suite, using GEE");
                self.gee(n, profile)
            }
        };
        let upper = (self.table_rows as f64).max(d);
        if est.is_finite() {
            est.max(d).min(upper)
        } else {
            d
        }
    }

    /// `d · N/n`. Exact for uniformly random samples.
    fn scale(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        profile.distinct() as f64 * self.table_rows as f64 / n
    }

    /// `√(N/n) · max(f₁, 1) + Σ_{j≥2} f_j`
    fn error_bound(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let f1 = profile.singletons() as f64;
        let rest = profile.distinct() as f64 - f1;
        rest + (self.table_rows as f64 / n).sqrt() * f1.max(1.0)
    }

    /// Guaranteed-error estimator: `√(N/n) · f₁ + Σ_{j≥2} f_j`
    fn gee(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let f1 = profile.singletons() as f64;
        let rest = profile.distinct() as f64 - f1;
        rest + (self.table_rows as f64 / n).sqrt() * f1
    }

    /// `d + f₁²/f₂`, falling back to scale when there are no doubletons.
    fn chao(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let f2 = profile.doubletons() as f64;
        if profile.len() <= 2 || f2 == 0.0 {
            return self.scale(n, profile);
        }
        let f1 = profile.singletons() as f64;
        profile.distinct() as f64 + f1 * f1 / f2
    }

    fn shlosser(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        let q = n / self.table_rows as f64;
        let mut sum1 = 0.0;
        let mut sum2 = 0.0;
        for i in 1..profile.len() {
            let fi = profile.f(i) as f64;
            if fi == 0.0 {
                continue;
            }
            sum1 += fi * (1.0 - q).powi(i as i32);
            sum2 += fi * (1.0 - q).powi(i as i32 - 1) * i as f64 * q;
        }
        sum1 *= profile.singletons() as f64;
        if sum2 == 0.0 {
            self.scale(n, profile)
        } else {
            d + sum1 / sum2
        }
    }

    fn chao_lee(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        let big_n = self.table_rows as f64;
        let f1 = profile.singletons() as f64;
        let c_hat = 1.0 - f1 / big_n;
        if c_hat <= 0.0 {
            return self.scale(n, profile);
        }
        let nonzero = profile.nonzero();
        let gamma_sq = if nonzero.len() <= 1 {
            0.0
        } else {
            population_variance(&nonzero) / big_n / big_n
        };
        d / c_hat + n * (1.0 - c_hat) * gamma_sq / c_hat
    }

    /// `d + (n−1)·f₁/n`
    fn jackknife(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let f1 = profile.singletons() as f64;
        profile.distinct() as f64 + (n - 1.0) * f1 / n
    }

    /// Zero-truncated GIG-Poisson parameter solve; the minimum positive
    /// candidate over a fan of initial guesses wins, observed d otherwise.
    fn sichel(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        let f1 = profile.singletons() as f64;
        if f1 == 0.0 || n == d {
            return d;
        }
        let a = 2.0 * n / d - (n / f1).ln();
        let b = 2.0 * f1 / d + (n / f1).ln();
        let eq = |g: f64| {
            if g <= 0.0 {
                return f64::NAN;
            }
            (1.0 + g) * g.ln() - a * g + b
        };
        let lower = f1 / n;
        let mut candidates = Vec::new();
        for init in linspace(lower + 1e-5, 0.999_999, 20) {
            if let Some(g) = find_root(&eq, init) {
                if g > lower && g < 1.0 {
                    let b_hat = g * (n * g / f1).ln() / (1.0 - g);
                    let c_hat = (1.0 - g * g) / (n * g * g);
                    let est = 2.0 / (b_hat * c_hat);
                    if est.is_finite() && est > 0.0 {
                        candidates.push(est);
                    }
                }
            }
        }
        candidates.into_iter().reduce(f64::min).unwrap_or(d)
    }

    fn goodman(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        if n == d {
            return d;
        }
        let big_n = self.table_rows as f64;
        if big_n - n <= 0.0 {
            return d;
        }
        let mut sum = 0.0;
        for i in 1..profile.len() {
            let fi = profile.f(i) as f64;
            if fi == 0.0 {
                continue;
            }
            let i_f = i as f64;
            if n - i_f + 1.0 <= 0.0 {
                continue;
            }
            let ln_term = ln_gamma(big_n - n + i_f) - ln_gamma(big_n - n) + ln_gamma(n - i_f + 1.0)
                - ln_gamma(n + 1.0);
            let term = ln_term.exp() * fi;
            if !term.is_finite() {
                continue;
            }
            // (−1)^{i+1}: additive for odd i.
            if i % 2 == 1 {
                sum += term;
            } else {
                sum -= term;
            }
        }
        d + sum
    }

    /// Solve `D · (1 − e^{−n/D}) = d` for D.
    fn moments_v1(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        if d == n {
            return d;
        }
        let f = |big_d: f64| {
            if big_d <= 0.0 {
                return f64::NAN;
            }
            big_d * (1.0 - (-n / big_d).exp()) - d
        };
        min_positive_root(&f, &[d, d * 2.0]).unwrap_or(d)
    }

    /// Solve `D · (1 − h(N/D)) = d` where h is the hypergeometric exclusion
    /// probability, evaluated through log-gamma for stability.
    fn moments_v2(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        let big_n = self.table_rows as f64;
        let f = |big_d: f64| {
            if big_d <= 0.0 {
                return f64::NAN;
            }
            big_d * (1.0 - h_x(big_n / big_d, n, big_n)) - d
        };
        min_positive_root(&f, &[d, d * 2.0]).unwrap_or(d)
    }

    /// v2 with a γ²-based bias correction term.
    fn moments_v3(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        let big_n = self.table_rows as f64;
        let d_v2 = self.moments_v2(n, profile);
        if d_v2 == 0.0 {
            return d;
        }
        let n_tilde = big_n / d_v2;

        let counts = profile.counts();
        let mean = counts.iter().sum::<u64>() as f64 / counts.len() as f64;
        if mean == 0.0 {
            return d;
        }
        let variance = counts
            .iter()
            .map(|&c| {
                let diff = c as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / counts.len() as f64;
        let gamma_sq = variance / (mean * mean);

        let h_val = h_x(n_tilde, n, big_n);
        if !h_val.is_finite() {
            return d;
        }

        let mut g_val = 0.0;
        for k in 0..(n as u64) {
            let denom = big_n - n_tilde - n + k as f64;
            if denom.abs() < f64::EPSILON {
                return d;
            }
            g_val += 1.0 / denom;
        }

        let correction = 0.5 * n_tilde * n_tilde * gamma_sq * d_v2 * h_val * (g_val - g_val * g_val);
        let denominator = 1.0 - h_val + correction;
        if denominator == 0.0 || !denominator.is_finite() {
            return d;
        }
        d / denominator
    }

    /// `Σ f_i / (1 − (1 − 1/N)^i)`
    fn horvitz_thompson(&self, _n: f64, profile: &FrequencyProfile) -> f64 {
        let big_n = self.table_rows as f64;
        let mut estimate = 0.0;
        for i in 1..profile.len() {
            let fi = profile.f(i) as f64;
            if fi == 0.0 {
                continue;
            }
            let inclusion = 1.0 - (1.0 - 1.0 / big_n).powi(i as i32);
            if inclusion <= 0.0 {
                continue;
            }
            estimate += fi / inclusion;
        }
        estimate
    }

    /// `d + Σ f_i · (1 − i/n)^n`
    fn bootstrap(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        if d == n {
            return d;
        }
        let mut result = d;
        for i in 1..profile.len() {
            let fi = profile.f(i) as f64;
            if fi == 0.0 {
                continue;
            }
            result += fi * (1.0 - i as f64 / n).powf(n);
        }
        result
    }

    fn smoothed_jackknife(&self, n: f64, profile: &FrequencyProfile) -> f64 {
        let d = profile.distinct() as f64;
        let f1 = profile.singletons() as f64;
        if f1 == 0.0 {
            return d;
        }
        let big_n = self.table_rows as f64;
        let d0 = d - f1 / n;
        let correction = (big_n - n + 1.0) * f1 / (n * big_n);
        if (1.0 - correction).abs() < f64::EPSILON {
            return d;
        }
        let d_hat_0 = d0 / (1.0 - correction);

        let harmonic: f64 = (1..=profile.distinct()).map(|i| 1.0 / i as f64).sum();
        let bias = harmonic / d;
        if (1.0 - bias).abs() < f64::EPSILON {
            return d;
        }
        d_hat_0 / (1.0 - bias)
    }
}

/// `h(x) = C(N−x, n) / C(N, n)` via log-gamma; NaN outside the domain so
/// root-finders reject the point instead of chasing a bogus value.
fn h_x(x: f64, n: f64, big_n: f64) -> f64 {
    if big_n - x - n + 1.0 <= 0.0 || big_n - x + 1.0 <= 0.0 {
        return f64::NAN;
    }
    (ln_gamma(big_n - x + 1.0) + ln_gamma(big_n - n + 1.0)
        - ln_gamma(big_n - x - n + 1.0)
        - ln_gamma(big_n + 1.0))
    .exp()
}

fn population_variance(values: &[u64]) -> f64 {
    let len = values.len() as f64;
    let mean = values.iter().sum::<u64>() as f64 / len;
    values
        .iter()
        .map(|&v| {
            let diff = v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / len
}
