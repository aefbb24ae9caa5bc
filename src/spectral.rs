//! Spectral kernel used by the split engine.
//!
//! For an affinity matrix `A` (zero diagonal) with degrees `d`, the normalized
//! operator `M = D^{-1/2} A D^{-1/2}` has `sqrt(d)` as an eigenvector with
//! eigenvalue 1. The next eigenvector (the one the normalized cut is read from) is
//! found by power iteration on the shifted operator `M + sI`, re-orthogonalised
//! against `sqrt(d)` at every step. `s` is a Gershgorin bound on `|λ(M)|`, so the
//! shifted spectrum is non-negative and the dominant remaining direction is the
//! one with the largest eigenvalue of `M`.
//!
//! The start vector is a fixed hashed sequence (SplitMix64 of the position), which
//! keeps the whole computation deterministic without the symmetries a regular
//! sequence would have.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};

/// Parameters of the power iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralOptions {
    /// Stop when successive unit vectors differ (up to sign) by less than this.
    pub tolerance: f64,
    /// Hard cap on iterations per split.
    pub max_iterations: usize,
}

impl Default for SpectralOptions {
    fn default() -> Self {
        SpectralOptions {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Computes the partition vector `f = D^{-1/2} u` for the affinity `a`, where
/// `u` is the second eigenvector of the normalized operator. Members with zero
/// or negative degree get `f_i = 0`.
///
/// The sign of the result is arbitrary; callers orient it.
pub fn fiedler_vector(a: &Array2<f64>, options: &SpectralOptions) -> Array1<f64> {
    let k = a.nrows();
    let degrees = a.sum_axis(Axis(1));
    let inv_sqrt: Array1<f64> = degrees.mapv(|d| if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 });

    let mut m = a.clone();
    for ((i, j), v) in m.indexed_iter_mut() {
        *v *= inv_sqrt[i] * inv_sqrt[j];
    }
    let shift = m
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    for i in 0..k {
        m[[i, i]] += shift;
    }

    let mut top: Array1<f64> = degrees.mapv(|d| if d > 0.0 { d.sqrt() } else { 0.0 });
    let top_norm = top.dot(&top).sqrt();
    if top_norm > 0.0 {
        top /= top_norm;
    }

    let mut x = start_vector(k, &top);
    let mut converged = false;
    for _ in 0..options.max_iterations {
        let mut y = m.dot(&x);
        orthogonalize(&mut y, &top);
        let norm = y.dot(&y).sqrt();
        if norm <= f64::MIN_POSITIVE {
            // x spans the null space of the shifted operator: already an eigenvector.
            converged = true;
            break;
        }
        y /= norm;
        let delta = (&y - &x).mapv(f64::abs).sum().min((&y + &x).mapv(f64::abs).sum());
        x = y;
        if delta < options.tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(size = k, iterations = options.max_iterations, "power iteration did not converge; using last iterate");
    }

    x * &inv_sqrt
}

fn start_vector(k: usize, top: &Array1<f64>) -> Array1<f64> {
    let mut x = Array1::from_shape_fn(k, start_component);
    orthogonalize(&mut x, top);
    let mut norm = x.dot(&x).sqrt();
    if norm <= f64::EPSILON {
        // Fall back to a centred ramp.
        let mid = (k as f64 - 1.0) / 2.0;
        x = Array1::from_shape_fn(k, |i| i as f64 - mid);
        orthogonalize(&mut x, top);
        norm = x.dot(&x).sqrt();
    }
    if norm > 0.0 {
        x /= norm;
    }
    x
}

// SplitMix64 finaliser mapped to [-0.5, 0.5).
fn start_component(i: usize) -> f64 {
    let mut z = (i as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64 - 0.5
}

#[inline]
fn orthogonalize(v: &mut Array1<f64>, unit: &Array1<f64>) {
    let proj = v.dot(unit);
    v.scaled_add(-proj, unit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn same_sign(v: &Array1<f64>, idx: &[usize]) -> bool {
        idx.iter().all(|&i| v[i] > 0.0) || idx.iter().all(|&i| v[i] < 0.0)
    }

    #[test]
    fn separates_two_blocks() {
        let a = arr2(&[
            [0.0, 0.9, 0.1, 0.1],
            [0.9, 0.0, 0.1, 0.1],
            [0.1, 0.1, 0.0, 0.9],
            [0.1, 0.1, 0.9, 0.0],
        ]);
        let f = fiedler_vector(&a, &SpectralOptions::default());
        assert!(same_sign(&f, &[0, 1]));
        assert!(same_sign(&f, &[2, 3]));
        assert!(f[0] * f[2] < 0.0);
        assert!((f[0] - f[1]).abs() < 1e-8);
    }

    #[test]
    fn isolated_members_get_zero() {
        let a = arr2(&[
            [0.0, 1.0, 0.0, 0.2],
            [1.0, 0.0, 0.0, 0.2],
            [0.0, 0.0, 0.0, 0.0],
            [0.2, 0.2, 0.0, 0.0],
        ]);
        let f = fiedler_vector(&a, &SpectralOptions::default());
        assert_eq!(f[2], 0.0);
        assert!(f.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn zero_matrix_is_finite() {
        let a = Array2::<f64>::zeros((3, 3));
        let f = fiedler_vector(&a, &SpectralOptions::default());
        assert!(f.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn deterministic() {
        let a = arr2(&[
            [0.0, 0.7, 0.2, 0.4],
            [0.7, 0.0, 0.3, 0.1],
            [0.2, 0.3, 0.0, 0.8],
            [0.4, 0.1, 0.8, 0.0],
        ]);
        let opts = SpectralOptions::default();
        assert_eq!(fiedler_vector(&a, &opts), fiedler_vector(&a, &opts));
    }
}
