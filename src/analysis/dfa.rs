//! Detrended Fluctuation Analysis (DFA).
//!
//! DFA estimates the statistical self-affinity of a signal. For RR series the
//! short-range exponent alpha1 (boxes of 4-16 beats) separates organized,
//! fractal-like rhythm (alpha1 around 0.75-1.0) from random (about 0.5) or
//! strongly correlated (above 1.0) behaviour. The long-range exponent alpha2
//! uses boxes of 16-64 beats.
//!
//! This is the only DFA implementation in the crate: the recovery window
//! search and the nonlinear metrics both go through [`short_term`], so a
//! window's reported alpha1 is exactly the value its nonlinear metrics show.
//!
//! # Example
//!
//! ```rust
//! use hrv_recovery::analysis::dfa::{DFAnalysis, DetrendStrategy};
//!
//! let data: Vec<f64> = (0..128).map(|i| 1000.0 + ((i * 37) % 23) as f64).collect();
//! let boxes = vec![4, 8, 16, 32];
//!
//! let analysis = DFAnalysis::dfa(&data, &boxes, &DetrendStrategy::Linear).unwrap();
//! println!("Alpha: {}", analysis.alpha);
//! println!("R-squared: {}", analysis.r_squared);
//! ```
//!
//! # References
//!
//! - Peng, C.-K., Havlin, S., Stanley, H. E., Goldberger, A. L. (1995). *Quantification of scaling
//!   exponents and crossover phenomena in nonstationary heartbeat time series*. Chaos, 5(1), 82-87.

use crate::config::DfaConfig;
use anyhow::anyhow;
use anyhow::Result;
use core::f64;
use nalgebra::DMatrix;
use nalgebra::DVector;
use nalgebra::DVectorView;
use rayon::iter::ParallelIterator;
use rayon::slice::ParallelSlice;

/// A trait representing a detrending algorithm for time series data.
///
/// # Example
///
/// ```
/// use hrv_recovery::analysis::dfa::DetrendAlgorithm;
/// use anyhow::Result;
///
/// struct MeanDetrend;
///
/// impl DetrendAlgorithm for MeanDetrend {
///     fn detrend(&self, data: &[f64]) -> Result<Vec<f64>> {
///         let mean = data.iter().sum::<f64>() / data.len() as f64;
///         Ok(data.iter().map(|x| x - mean).collect())
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait DetrendAlgorithm {
    /// Removes trends from the provided data and returns the residuals.
    fn detrend(&self, data: &[f64]) -> Result<Vec<f64>>;
}

/// Available detrend strategies.
/// User provided algorithms can be passed via the `Custom` variant.
pub enum DetrendStrategy {
    /// Least squares straight line removal.
    Linear,
    /// A custom detrending algorithm. Must be `Sync` and `Send` because
    /// segments are detrended in parallel.
    Custom(Box<dyn DetrendAlgorithm + Sync + Send>),
}

impl DetrendAlgorithm for DetrendStrategy {
    fn detrend(&self, data: &[f64]) -> Result<Vec<f64>> {
        match self {
            DetrendStrategy::Linear => LinearDetrend.detrend(data),
            DetrendStrategy::Custom(detrender) => detrender.detrend(data),
        }
    }
}

/// Removes the least squares line fitted against the sample index.
///
/// The fit uses the closed-form normal equations; detrending runs once per
/// box, so this is the hot loop of the window search.
pub struct LinearDetrend;

impl DetrendAlgorithm for LinearDetrend {
    fn detrend(&self, data: &[f64]) -> Result<Vec<f64>> {
        if data.len() < 2 {
            return Err(anyhow!(
                "Data must contain at least two elements for detrending."
            ));
        }
        let n = data.len() as f64;
        let sum_x = n * (n - 1.0) / 2.0;
        let sum_xx = (n - 1.0) * n * (2.0 * n - 1.0) / 6.0;
        let (sum_y, sum_xy) = data
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(sy, sxy), (i, &y)| (sy + y, sxy + i as f64 * y));
        let denom = n * sum_xx - sum_x * sum_x;
        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let intercept = (sum_y - slope * sum_x) / n;

        Ok(data
            .iter()
            .enumerate()
            .map(|(i, &y)| y - (slope * i as f64 + intercept))
            .collect())
    }
}

/// Result of a Detrended Fluctuation Analysis.
///
/// * `alpha` - The scaling exponent.
/// * `intercept` - The intercept of the linear fit in the log-log plot.
/// * `r_squared` - The coefficient of determination of that fit.
/// * `log_n` - Logarithm of the box sizes that produced a finite fluctuation.
/// * `log_f` - Logarithm of the corresponding fluctuation amplitudes.
#[derive(Debug, Clone, PartialEq)]
pub struct DFAnalysis {
    pub alpha: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub log_n: Vec<f64>,
    pub log_f: Vec<f64>,
}

impl DFAnalysis {
    /// Performs Detrended Fluctuation Analysis on `data`.
    ///
    /// # Arguments
    ///
    /// - `data`: The input time series.
    /// - `boxes`: Box sizes (in samples) for the fluctuation analysis.
    /// - `detrender`: The detrending applied to every box.
    ///
    /// # Errors
    ///
    /// This method returns an error if:
    /// - `boxes` is empty.
    /// - The data is shorter than four times the largest box.
    /// - The smallest box is less than 4.
    /// - The `detrender` fails on a box.
    /// - Fewer than two box sizes yield a non-zero fluctuation (e.g. a
    ///   constant series).
    ///
    /// # Algorithm Overview
    ///
    /// 1. **Integration**: the mean-centred series is accumulated into a profile.
    /// 2. **Box detrending**: the profile is cut into non-overlapping boxes of
    ///    each size (an incomplete trailing box is dropped) and every box is
    ///    detrended.
    /// 3. **Fluctuation**: `F(n)` is the root of the mean residual variance.
    /// 4. **Log-log regression**: the slope of `ln F(n)` against `ln n` is alpha.
    pub fn dfa(data: &[f64], boxes: &[usize], detrender: &DetrendStrategy) -> Result<Self> {
        let boxes = {
            let mut b = boxes.to_owned();
            b.sort_unstable();
            b.dedup();
            b
        };
        let (Some(&smallest), Some(&largest)) = (boxes.first(), boxes.last()) else {
            return Err(anyhow!("Box sizes must not be empty"));
        };
        if data.len() < 4 * largest {
            return Err(anyhow!(
                "Data length must be at least 4x the size of the largest box"
            ));
        }
        if smallest < 4 {
            return Err(anyhow!("Minimum box size must be at least 4"));
        }
        let data = DVectorView::from(data);
        let mean = data.mean();
        let integrated: Vec<f64> = data
            .iter()
            .scan(0.0, |state, &x| {
                *state += x - mean;
                Some(*state)
            })
            .collect();

        let mut log_n: Vec<f64> = Vec::with_capacity(boxes.len());
        let mut log_f: Vec<f64> = Vec::with_capacity(boxes.len());

        for size in boxes {
            let variances = integrated
                .par_chunks(size)
                .filter(|slice| slice.len() == size)
                .map(|slice| -> Result<f64> {
                    let detrended = DVector::from(detrender.detrend(slice)?);
                    Ok(detrended.variance())
                })
                .collect::<Result<Vec<f64>>>()?;
            if variances.is_empty() {
                continue;
            }
            let f_n = (variances.iter().sum::<f64>() / variances.len() as f64).sqrt();
            if f_n.is_finite() && f_n > 0.0 {
                log_n.push((size as f64).ln());
                log_f.push(f_n.ln());
            }
        }

        if log_n.len() < 2 {
            return Err(anyhow!(
                "Fluctuation is zero for all but {} box sizes",
                log_n.len()
            ));
        }
        let ((alpha, intercept), r_squared) = linear_fit(&log_n, &log_f)?;

        Ok(DFAnalysis {
            alpha,
            intercept,
            r_squared,
            log_n,
            log_f,
        })
    }
}

/// Short-range exponent (alpha1) with linear detrending.
pub fn short_term(data: &[f64], config: &DfaConfig) -> Result<DFAnalysis> {
    DFAnalysis::dfa(data, &config.short_boxes(), &DetrendStrategy::Linear)
}

/// Long-range exponent (alpha2) with linear detrending.
pub fn long_term(data: &[f64], config: &DfaConfig) -> Result<DFAnalysis> {
    DFAnalysis::dfa(data, &config.long_boxes(), &DetrendStrategy::Linear)
}

/// Performs linear regression on the provided data.
///
/// Returns the slope and intercept of the best-fit line together with the
/// coefficient of determination. A perfectly flat `y` yields an R-squared of 1.
///
/// # Errors
///
/// This function returns an error if:
/// - The length of `x` is less than 2.
/// - The lengths of `x` and `y` do not match.
pub(crate) fn linear_fit(x: &[f64], y: &[f64]) -> Result<((f64, f64), f64)> {
    if x.len() < 2 {
        return Err(anyhow!(
            "Data must contain at least two elements for linear fit."
        ));
    }
    if x.len() != y.len() {
        return Err(anyhow!("X and Y data must have the same length."));
    }
    let prob_matrix = DMatrix::from_columns(&[
        DVector::from_column_slice(x),
        DVector::from_element(x.len(), 1.0),
    ]);
    let y = DVectorView::from(y);
    let result = lstsq::lstsq(&prob_matrix, &y.into(), f64::EPSILON).map_err(|e| anyhow!(e))?;

    let y_mean = y.mean();
    let tss: f64 = y.iter().map(|&yi| (yi - y_mean).powi(2)).sum();
    let r_squared = if tss > f64::EPSILON {
        1.0 - (result.residuals / tss)
    } else {
        1.0
    };

    Ok(((result.solution[0], result.solution[1]), r_squared))
}
