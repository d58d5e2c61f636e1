//! Artifact detection for RR interval series.
//!
//! Each interval is checked against a list of [`ArtifactCriterion`]s. The
//! default detector first applies physiologic bounds and then compares the
//! interval with the median of its neighbours. Interior beats use a centred
//! neighbourhood; beats close to either end of the series fall back to a
//! forward-only or backward-only neighbourhood of the same size.

use crate::config::ArtifactConfig;
use crate::error::{HrvError, Result};
use crate::series::{RRPoint, RRSeries};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Why an interval was rejected.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ArtifactReason {
    /// Shorter than the physiologic lower bound.
    BelowPhysiologicRange,
    /// Longer than the physiologic upper bound.
    AbovePhysiologicRange,
    /// Deviates too far from the local rhythm.
    RhythmDeviation,
    /// Rejected by a user supplied criterion.
    Other,
}

/// Per-beat classification, index aligned with the series.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct ArtifactFlag {
    pub is_artifact: bool,
    pub reason: Option<ArtifactReason>,
}

impl ArtifactFlag {
    pub const CLEAN: ArtifactFlag = ArtifactFlag {
        is_artifact: false,
        reason: None,
    };

    pub fn artifact(reason: ArtifactReason) -> Self {
        Self {
            is_artifact: true,
            reason: Some(reason),
        }
    }

    pub fn is_clean(&self) -> bool {
        !self.is_artifact
    }
}

/// A rule deciding whether an interval is an artifact.
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactCriterion {
    /// Classifies `value` given its neighbouring intervals.
    ///
    /// # Arguments
    ///
    /// * `value` - The interval under test in milliseconds.
    /// * `neighbours` - Surrounding intervals, excluding `value` itself.
    ///
    /// # Returns
    ///
    /// `Some(reason)` if the interval is rejected, `None` otherwise.
    fn check(&self, value: f64, neighbours: &[f64]) -> Option<ArtifactReason>;
}

/// Rejects intervals outside fixed physiologic limits.
pub struct PhysiologicBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ArtifactCriterion for PhysiologicBounds {
    fn check(&self, value: f64, _neighbours: &[f64]) -> Option<ArtifactReason> {
        if value < self.lower {
            Some(ArtifactReason::BelowPhysiologicRange)
        } else if value > self.upper {
            Some(ArtifactReason::AbovePhysiologicRange)
        } else {
            None
        }
    }
}

/// Rejects intervals deviating from the neighbourhood median by more than
/// `ratio` of that median.
///
/// Neighbours outside `[lower, upper]` are left out of the baseline so a
/// single gross artifact does not drag its neighbours along.
pub struct RelativeDeviation {
    pub ratio: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ArtifactCriterion for RelativeDeviation {
    fn check(&self, value: f64, neighbours: &[f64]) -> Option<ArtifactReason> {
        let plausible: Vec<f64> = neighbours
            .iter()
            .copied()
            .filter(|v| (self.lower..=self.upper).contains(v))
            .collect();
        let baseline = median(&plausible)?;
        if (value - baseline).abs() > self.ratio * baseline {
            Some(ArtifactReason::RhythmDeviation)
        } else {
            None
        }
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Index range of the `count` neighbours of `idx` in a series of length `len`.
///
/// Returns the range *including* `idx`; callers skip it. Near the edges the
/// range is shifted so it stays `count + 1` long whenever the series allows.
fn neighbourhood(idx: usize, len: usize, count: usize) -> Range<usize> {
    let span = (count + 1).min(len);
    let back = count / 2;
    let start = idx.saturating_sub(back).min(len - span);
    start..start + span
}

/// Flags artifacts in an RR series.
pub struct ArtifactDetector {
    criteria: Vec<Box<dyn ArtifactCriterion + Send + Sync>>,
    neighbour_beats: usize,
}

impl ArtifactDetector {
    /// Creates a detector without criteria; every beat is clean until
    /// criteria are added.
    pub fn new(neighbour_beats: usize) -> Self {
        Self {
            criteria: Vec::new(),
            neighbour_beats: neighbour_beats.max(1),
        }
    }

    /// Physiologic bounds followed by the relative deviation rule.
    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(config.neighbour_beats)
            .with_criterion(Box::new(PhysiologicBounds {
                lower: config.min_rr_ms,
                upper: config.max_rr_ms,
            }))
            .with_criterion(Box::new(RelativeDeviation {
                ratio: config.max_relative_deviation,
                lower: config.min_rr_ms,
                upper: config.max_rr_ms,
            }))
    }

    /// Appends a criterion; criteria are evaluated in insertion order and the
    /// first rejection wins.
    pub fn with_criterion(mut self, criterion: Box<dyn ArtifactCriterion + Send + Sync>) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Classifies every interval of `series`. Never fails.
    pub fn detect(&self, series: &RRSeries) -> Vec<ArtifactFlag> {
        let rr: Vec<f64> = series.points().iter().map(|p| p.rr()).collect();
        self.classify(&rr)
    }

    fn classify(&self, rr: &[f64]) -> Vec<ArtifactFlag> {
        let len = rr.len();
        (0..len)
            .into_par_iter()
            .map(|idx| {
                let range = neighbourhood(idx, len, self.neighbour_beats);
                let neighbours: Vec<f64> = range
                    .filter(|&j| j != idx)
                    .map(|j| rr[j])
                    .collect();
                self.criteria
                    .iter()
                    .find_map(|c| c.check(rr[idx], &neighbours))
                    .map_or(ArtifactFlag::CLEAN, ArtifactFlag::artifact)
            })
            .collect()
    }
}

/// Runs the default detector configured by `config`.
pub fn detect_artifacts(series: &RRSeries, config: &ArtifactConfig) -> Vec<ArtifactFlag> {
    let flags = ArtifactDetector::from_config(config).detect(series);
    log::debug!(
        "artifact detection: {} of {} beats flagged",
        flags.iter().filter(|f| f.is_artifact).count(),
        flags.len()
    );
    flags
}

/// Rejects flags that are not index aligned with `series` and ranges that do
/// not fit inside it.
pub(crate) fn check_window(
    series: &RRSeries,
    flags: &[ArtifactFlag],
    start: usize,
    end: usize,
) -> Result<()> {
    if flags.len() != series.len() {
        return Err(HrvError::InvalidInput(format!(
            "{} artifact flags for {} beats",
            flags.len(),
            series.len()
        )));
    }
    if start > end || end > series.len() {
        return Err(HrvError::InvalidInput(format!(
            "window {start}..{end} outside series of {} beats",
            series.len()
        )));
    }
    Ok(())
}

/// Percentage (0-100) of flagged beats in `range`; 0 for an empty range.
///
/// # Errors
///
/// `InvalidInput` when `range` does not fit inside `flags`.
pub fn artifact_percentage(flags: &[ArtifactFlag], range: Range<usize>) -> Result<f64> {
    let window = flags.get(range.clone()).ok_or_else(|| {
        HrvError::InvalidInput(format!(
            "window {}..{} outside {} artifact flags",
            range.start,
            range.end,
            flags.len()
        ))
    })?;
    if window.is_empty() {
        return Ok(0.0);
    }
    let flagged = window.iter().filter(|f| f.is_artifact).count();
    Ok(100.0 * flagged as f64 / window.len() as f64)
}

/// Clean intervals (ms) of `range`, in series order.
///
/// # Errors
///
/// `InvalidInput` for misaligned flags or a range outside the series.
pub fn clean_rr_values(
    series: &RRSeries,
    flags: &[ArtifactFlag],
    range: Range<usize>,
) -> Result<Vec<f64>> {
    check_window(series, flags, range.start, range.end)?;
    Ok(clean_values(&series.points()[range.clone()], &flags[range]))
}

/// Clean intervals of index aligned `points` and `flags`.
pub(crate) fn clean_values(points: &[RRPoint], flags: &[ArtifactFlag]) -> Vec<f64> {
    points
        .iter()
        .zip(flags)
        .filter(|(_, flag)| flag.is_clean())
        .map(|(p, _)| p.rr())
        .collect()
}

/// Number of clean beats in `range`, 0 when it lies outside `flags`.
pub(crate) fn clean_count(flags: &[ArtifactFlag], range: Range<usize>) -> usize {
    flags
        .get(range)
        .map_or(0, |window| window.iter().filter(|f| f.is_clean()).count())
}
