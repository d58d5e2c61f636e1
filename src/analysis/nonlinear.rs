//! Nonlinear HRV metrics: Poincaré plot geometry, sample and approximate
//! entropy, and the DFA scaling exponents.
//!
//! # Example
//! ```rust
//! use hrv_recovery::analysis::nonlinear::poincare_from_pairs;
//!
//! let rr = [1000.0, 1010.0, 1001.0, 1030.0, 1049.0];
//! let poincare = poincare_from_pairs(&rr[..4], &rr[1..]).unwrap();
//! println!("SD1: {}, SD2: {}", poincare.sd1, poincare.sd2);
//! ```

use super::dfa;
use crate::config::{DfaConfig, NonlinearConfig};
use crate::error::{require_beats, Result as HrvResult};
use crate::preprocessing::artifacts::{clean_rr_values, ArtifactFlag};
use crate::series::RRSeries;
use anyhow::anyhow;
use anyhow::Result;
use core::f64;
use nalgebra::DMatrix;
use nalgebra::DVectorView;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axes of the Poincaré ellipse. SD1 is the smaller one.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoincareAxes {
    pub sd1: f64,
    pub sd2: f64,
}

/// Nonlinear statistics of one analysis window.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NonlinearMetrics {
    pub sd1: f64,
    pub sd2: f64,
    /// Absent when SD2 is zero.
    pub sd1_sd2_ratio: Option<f64>,
    /// Area of the SD1/SD2 ellipse, `π·SD1·SD2`.
    pub ellipse_area: f64,
    /// Absent when no template of length `m + 1` matched.
    pub sample_entropy: Option<f64>,
    pub approximate_entropy: f64,
    pub dfa_alpha1: f64,
    pub dfa_alpha1_r_squared: f64,
    /// Absent when there are too few beats for the long-range scales.
    pub dfa_alpha2: Option<f64>,
}

/// Poincaré metrics of explicit `(rr[n], rr[n+1])` pairs, given column-wise.
///
/// # Errors
/// Returns an error for mismatched columns or fewer than two pairs.
pub fn poincare_from_pairs(current: &[f64], next: &[f64]) -> Result<PoincareAxes> {
    if current.len() != next.len() {
        return Err(anyhow!("Poincaré columns must have the same length."));
    }
    if current.len() < 2 {
        return Err(anyhow!(
            "At least two successive pairs are needed for Poincaré metrics."
        ));
    }

    let rr_points_a = DVectorView::from(current);
    let rr_points_b = DVectorView::from(next);

    // Center the data
    let poincare_matrix = {
        let mut centered = DMatrix::from_columns(&[rr_points_a, rr_points_b]);
        let col_means = centered.row_mean();
        for mut row in centered.row_iter_mut() {
            row -= &col_means;
        }
        centered
    };

    let poincare_cov =
        poincare_matrix.transpose() * &poincare_matrix / (poincare_matrix.nrows() as f64 - 1.0);
    let ev = nalgebra::SymmetricEigen::new(poincare_cov);

    let (small, large) = if ev.eigenvalues[0] < ev.eigenvalues[1] {
        (ev.eigenvalues[0], ev.eigenvalues[1])
    } else {
        (ev.eigenvalues[1], ev.eigenvalues[0])
    };

    // rounding can push a zero eigenvalue slightly negative
    Ok(PoincareAxes {
        sd1: small.max(0.0).sqrt(),
        sd2: large.max(0.0).sqrt(),
    })
}

fn chebyshev_match(data: &[f64], i: usize, j: usize, len: usize, r: f64) -> bool {
    (0..len).all(|k| (data[i + k] - data[j + k]).abs() <= r)
}

/// Sample entropy with embedding dimension `m` and tolerance `r`.
///
/// Self matches are excluded. Returns `None` when no template pair matches
/// at length `m + 1` or `m`.
pub fn sample_entropy(data: &[f64], m: usize, r: f64) -> Option<f64> {
    if m == 0 || data.len() <= m + 1 {
        return None;
    }
    let templates = data.len() - m;
    let (a, b) = (0..templates)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..templates).fold((0u64, 0u64), |(a, b), j| {
                if chebyshev_match(data, i, j, m, r) {
                    let longer = (data[i + m] - data[j + m]).abs() <= r;
                    (a + longer as u64, b + 1)
                } else {
                    (a, b)
                }
            })
        })
        .reduce(|| (0, 0), |x, y| (x.0 + y.0, x.1 + y.1));
    if a == 0 || b == 0 {
        return None;
    }
    Some(-(a as f64 / b as f64).ln())
}

fn apen_phi(data: &[f64], m: usize, r: f64) -> f64 {
    let templates = data.len() - m + 1;
    let logs: Vec<f64> = (0..templates)
        .into_par_iter()
        .map(|i| {
            let count = (0..templates)
                .filter(|&j| chebyshev_match(data, i, j, m, r))
                .count();
            (count as f64 / templates as f64).ln()
        })
        .collect();
    logs.iter().sum::<f64>() / templates as f64
}

/// Approximate entropy with embedding dimension `m` and tolerance `r`.
///
/// # Errors
/// Returns an error when `data` is too short for the embedding.
pub fn approximate_entropy(data: &[f64], m: usize, r: f64) -> Result<f64> {
    if m == 0 || data.len() <= m + 1 {
        return Err(anyhow!(
            "Approximate entropy needs more than m + 1 data points."
        ));
    }
    Ok(apen_phi(data, m, r) - apen_phi(data, m + 1, r))
}

/// Computes nonlinear metrics over the clean beats of `[start, end)`.
///
/// Poincaré pairs are only formed from adjacent clean beats; entropy and
/// DFA run on the sequence of clean intervals.
pub fn compute_nonlinear(
    series: &RRSeries,
    flags: &[ArtifactFlag],
    start: usize,
    end: usize,
    config: &NonlinearConfig,
    dfa_config: &DfaConfig,
) -> HrvResult<NonlinearMetrics> {
    super::check_window(series, flags, start, end)?;
    let rr = clean_rr_values(series, flags, start..end)?;
    require_beats(rr.len(), config.min_clean_beats.max(dfa_config.short_min_beats()))?;

    let (current, next): (Vec<f64>, Vec<f64>) = series.points()[start..end]
        .windows(2)
        .zip(flags[start..end].windows(2))
        .filter(|(_, f)| f[0].is_clean() && f[1].is_clean())
        .map(|(p, _)| (p[0].rr(), p[1].rr()))
        .unzip();
    let poincare = poincare_from_pairs(&current, &next)?;

    let entropy_input = &rr[..rr.len().min(config.entropy_max_beats)];
    let tolerance = config.entropy_r_factor * DVectorView::from(entropy_input).variance().sqrt();
    let sample_entropy = sample_entropy(entropy_input, config.entropy_m, tolerance);
    let approximate_entropy = approximate_entropy(entropy_input, config.entropy_m, tolerance)?;

    let alpha1 = dfa::short_term(&rr, dfa_config)?;
    let alpha2 = if rr.len() >= dfa_config.long_min_beats() {
        dfa::long_term(&rr, dfa_config)
            .map_err(|e| log::debug!("alpha2 unavailable: {e}"))
            .ok()
            .map(|d| d.alpha)
    } else {
        None
    };

    Ok(NonlinearMetrics {
        sd1: poincare.sd1,
        sd2: poincare.sd2,
        sd1_sd2_ratio: (poincare.sd2 > 0.0).then(|| poincare.sd1 / poincare.sd2),
        ellipse_area: f64::consts::PI * poincare.sd1 * poincare.sd2,
        sample_entropy,
        approximate_entropy,
        dfa_alpha1: alpha1.alpha,
        dfa_alpha1_r_squared: alpha1.r_squared,
        dfa_alpha2: alpha2,
    })
}
