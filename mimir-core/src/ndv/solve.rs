// Copyright (c) 2023-2024 CMU Database Group
//
// Use of this source code is governed by an MIT-style license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Scalar root finding and log-gamma support for the estimator suite.

use std::f64::consts::PI;

const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_13,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// Natural log of the gamma function (Lanczos approximation, g = 7).
/// Accurate to ~15 significant digits for positive arguments, which is all
/// the method-of-moments h(x) terms need.
pub(crate) fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Reflection formula keeps the approximation usable near zero.
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut acc = LANCZOS_COEFFS[0];
        for (i, &c) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
            acc += c / (x + i as f64);
        }
        let t = x + LANCZOS_G + 0.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
    }
}

/// Secant-method scalar root find starting from `x0`.
///
/// Returns `None` on divergence or when the function leaves the finite
/// domain; callers are expected to fall back to the observed distinct count.
pub(crate) fn find_root<F>(f: &F, x0: f64) -> Option<f64>
where
    F: Fn(f64) -> f64,
{
    let mut x_prev = x0;
    let mut f_prev = f(x_prev);
    if !f_prev.is_finite() {
        return None;
    }
    if f_prev.abs() <= 1e-12 * (1.0 + x_prev.abs()) {
        return Some(x_prev);
    }

    let mut x = x0 * 1.05 + 1e-6;
    let mut fx = f(x);
    for _ in 0..100 {
        if !fx.is_finite() {
            return None;
        }
        if fx.abs() <= 1e-9 * (1.0 + x.abs()) {
            return Some(x);
        }
        let denom = fx - f_prev;
        if denom.abs() < 1e-300 {
            break;
        }
        let next = x - fx * (x - x_prev) / denom;
        if !next.is_finite() {
            return None;
        }
        x_prev = x;
        f_prev = fx;
        x = next;
        if (x - x_prev).abs() <= 1e-12 * (1.0 + x.abs()) {
            fx = f(x);
            break;
        }
        fx = f(x);
    }

    if fx.is_finite() && fx.abs() <= 1e-6 * (1.0 + x.abs()) {
        Some(x)
    } else {
        None
    }
}

/// Tries every initial guess and returns the smallest strictly positive root.
pub(crate) fn min_positive_root<F>(f: &F, inits: &[f64]) -> Option<f64>
where
    F: Fn(f64) -> f64,
{
    inits
        .iter()
        .filter_map(|&x0| find_root(f, x0))
        .filter(|r| r.is_finite() && *r > 0.0)
        .fold(None, |best, r| match best {
            None => Some(r),
            Some(b) => Some(b.min(r)),
        })
}

/// `count` evenly spaced points over [start, end], endpoints included.
pub(crate) fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![start];
    }
    let step = (end - start) / (count - 1) as f64;
    (0..count).map(|i| start + step * i as f64).collect()
}
