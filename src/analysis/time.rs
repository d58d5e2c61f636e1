//! Time-domain measures of heart rate variability.
//!
//! Only clean beats contribute. Successive differences are formed between
//! neighbouring beats that are *both* clean, so removing an artifact never
//! creates an artificial jump between the beats around it.

use crate::config::TimeDomainConfig;
use crate::error::{require_beats, HrvError, Result as HrvResult};
use crate::preprocessing::artifacts::{clean_rr_values, ArtifactFlag};
use crate::series::{RRPoint, RRSeries};
use anyhow::anyhow;
use anyhow::Result;
use nalgebra::DVectorView;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Time-domain statistics of one analysis window.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDomainMetrics {
    /// Number of clean beats used.
    pub beat_count: usize,
    pub mean_rr: f64,
    pub median_rr: f64,
    /// Population standard deviation of the RR intervals.
    pub sdnn: f64,
    pub rmssd: f64,
    /// Standard deviation of successive differences.
    pub sdsd: f64,
    pub nn50: usize,
    /// Fraction (0-1) of successive differences above the NN threshold.
    pub pnn50: f64,
    pub mean_hr: f64,
    pub sd_hr: f64,
    pub min_hr: f64,
    pub max_hr: f64,
    /// HRV triangular index: beat count over the modal histogram count.
    pub triangular_index: f64,
}

/// Root mean square of successive differences (RMSSD), `None` when there
/// are no differences.
pub fn calc_rmssd(diffs: &[f64]) -> Option<f64> {
    if diffs.is_empty() {
        return None;
    }
    let diffs = DVectorView::from(diffs);
    Some((diffs.dot(&diffs) / diffs.len() as f64).sqrt())
}

/// Calculates the population standard deviation of RR intervals (SDNN).
///
/// # Errors
///
/// This function will return an error if the input slice contains fewer than two elements.
pub fn calc_sdnn(data: &[f64]) -> Result<f64> {
    if data.len() < 2 {
        Err(anyhow!(
            "Data must contain at least two elements for SDNN calculation."
        ))
    } else {
        let variance = DVectorView::from(data).variance();
        Ok(variance.sqrt())
    }
}

/// Successive differences `rr[i + 1] - rr[i]` of index aligned `points` and
/// `flags`, where both beats are clean.
pub(crate) fn clean_successive_differences(points: &[RRPoint], flags: &[ArtifactFlag]) -> Vec<f64> {
    points
        .windows(2)
        .zip(flags.windows(2))
        .filter(|(_, f)| f[0].is_clean() && f[1].is_clean())
        .map(|(p, _)| p[1].rr() - p[0].rr())
        .collect()
}

/// HRV triangular index of `data` for histogram bins of `bin_width` ms.
pub fn calc_triangular_index(data: &[f64], bin_width: f64) -> Result<f64> {
    if data.is_empty() || bin_width <= 0.0 {
        return Err(anyhow!(
            "Triangular index needs data and a positive bin width."
        ));
    }
    let mut histogram: HashMap<i64, usize> = HashMap::new();
    for &rr in data {
        *histogram.entry((rr / bin_width).floor() as i64).or_default() += 1;
    }
    let modal = histogram.values().copied().max().unwrap_or(1);
    Ok(data.len() as f64 / modal as f64)
}

fn median(data: &[f64]) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Computes time-domain metrics over the clean beats of `[start, end)`.
///
/// # Errors
///
/// `InsufficientData` when the window holds fewer than
/// `config.min_clean_beats` clean beats, `InvalidInput` for misaligned flags
/// or an out-of-bounds range.
pub fn compute_time_domain(
    series: &RRSeries,
    flags: &[ArtifactFlag],
    start: usize,
    end: usize,
    config: &TimeDomainConfig,
) -> HrvResult<TimeDomainMetrics> {
    super::check_window(series, flags, start, end)?;
    let rr = clean_rr_values(series, flags, start..end)?;
    require_beats(rr.len(), config.min_clean_beats.max(2))?;

    let diffs = clean_successive_differences(&series.points()[start..end], &flags[start..end]);
    let rmssd = calc_rmssd(&diffs).ok_or_else(|| {
        HrvError::Numerical(format!(
            "none of the {} clean beats in {start}..{end} are adjacent",
            rr.len()
        ))
    })?;
    let diff_view = DVectorView::from(diffs.as_slice());
    let sdsd = diff_view.variance().sqrt();
    let nn50 = diffs
        .iter()
        .filter(|d| d.abs() > config.nn_threshold_ms)
        .count();

    let hr: Vec<f64> = rr.iter().map(|&v| 60_000.0 / v).collect();
    let hr_view = DVectorView::from(hr.as_slice());

    Ok(TimeDomainMetrics {
        beat_count: rr.len(),
        mean_rr: DVectorView::from(rr.as_slice()).mean(),
        median_rr: median(&rr),
        sdnn: calc_sdnn(&rr)?,
        rmssd,
        sdsd,
        nn50,
        pnn50: nn50 as f64 / diffs.len() as f64,
        mean_hr: hr_view.mean(),
        sd_hr: hr_view.variance().sqrt(),
        min_hr: hr.iter().copied().fold(f64::INFINITY, f64::min),
        max_hr: hr.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        triangular_index: calc_triangular_index(&rr, config.histogram_bin_ms)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::artifacts::ArtifactReason;
    use time::macros::datetime;

    fn series(rr: &[u32]) -> RRSeries {
        RRSeries::from_intervals(rr, datetime!(2024-01-01 0:00 UTC)).unwrap()
    }

    fn clean(len: usize) -> Vec<ArtifactFlag> {
        vec![ArtifactFlag::CLEAN; len]
    }

    #[test]
    fn test_rmssd() {
        let diffs = [10.0, -10.0, 10.0, -10.0];
        assert!((calc_rmssd(&diffs).unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(calc_rmssd(&[]), None);
    }

    #[test]
    fn test_sdnn() {
        let data = [1000.0, 1010.0, 1020.0, 1030.0, 1040.0];
        let sdnn = calc_sdnn(&data).unwrap();
        assert!((sdnn - 200.0f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_sdnn_error() {
        assert!(calc_sdnn(&[1000.0]).is_err());
    }

    #[test]
    fn test_identical_intervals() {
        let s = series(&[857; 100]);
        let m = compute_time_domain(&s, &clean(100), 0, 100, &TimeDomainConfig::default()).unwrap();
        assert_eq!(m.rmssd, 0.0);
        assert_eq!(m.sdsd, 0.0);
        assert_eq!(m.sdnn, 0.0);
        assert_eq!(m.pnn50, 0.0);
        assert_eq!(m.triangular_index, 1.0);
        assert_eq!(m.min_hr, m.max_hr);
    }

    #[test]
    fn test_alternating_series() {
        let rr: Vec<u32> = (0..60).map(|i| if i % 2 == 0 { 800 } else { 900 }).collect();
        let s = series(&rr);
        let m = compute_time_domain(&s, &clean(60), 0, 60, &TimeDomainConfig::default()).unwrap();
        assert!((m.mean_rr - 850.0).abs() < 1e-9);
        assert!((m.sdnn - 50.0).abs() < 1e-9);
        assert!((m.rmssd - 100.0).abs() < 1e-9);
        assert_eq!(m.nn50, 59);
        assert_eq!(m.pnn50, 1.0);
        assert!((m.max_hr - 75.0).abs() < 1e-9);
        assert!((m.triangular_index - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_minimum_beat_count() {
        let config = TimeDomainConfig::default();
        let min = config.min_clean_beats;
        let s = series(&vec![800; min + 1]);
        let flags = clean(min + 1);
        assert_eq!(
            compute_time_domain(&s, &flags, 0, min - 1, &config),
            Err(HrvError::InsufficientData {
                required: min,
                available: min - 1
            })
        );
        assert!(compute_time_domain(&s, &flags, 0, min, &config).is_ok());
        assert!(compute_time_domain(&s, &flags, 0, min + 1, &config).is_ok());
    }

    #[test]
    fn test_artifacts_excluded_from_differences() {
        let mut rr = vec![800u32; 40];
        rr[20] = 2500;
        let s = series(&rr);
        let mut flags = clean(40);
        flags[20] = ArtifactFlag::artifact(ArtifactReason::AbovePhysiologicRange);
        let m = compute_time_domain(&s, &flags, 0, 40, &TimeDomainConfig::default()).unwrap();
        assert_eq!(m.beat_count, 39);
        assert_eq!(m.rmssd, 0.0);
        assert_eq!(m.mean_rr, 800.0);
    }

    #[test]
    fn test_no_adjacent_clean_beats() {
        let s = series(&[800; 80]);
        let flags: Vec<ArtifactFlag> = (0..80)
            .map(|i| {
                if i % 2 == 0 {
                    ArtifactFlag::CLEAN
                } else {
                    ArtifactFlag::artifact(ArtifactReason::RhythmDeviation)
                }
            })
            .collect();
        let err = compute_time_domain(&s, &flags, 0, 80, &TimeDomainConfig::default());
        match err {
            Err(HrvError::Numerical(msg)) => assert!(msg.contains("40 clean beats"), "{msg}"),
            other => panic!("expected a numerical error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_window() {
        let s = series(&[800; 40]);
        let config = TimeDomainConfig::default();
        assert!(matches!(
            compute_time_domain(&s, &clean(39), 0, 40, &config),
            Err(HrvError::InvalidInput(_))
        ));
        assert!(matches!(
            compute_time_domain(&s, &clean(40), 10, 41, &config),
            Err(HrvError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_triangular_index() {
        let data = [800.0, 801.0, 802.0, 900.0];
        // 800-802 share the [796.875, 804.6875) bin
        assert!((calc_triangular_index(&data, 7.8125).unwrap() - 4.0 / 3.0).abs() < 1e-9);
        assert!(calc_triangular_index(&[], 7.8125).is_err());
    }
}
