//! Search for the sub-window of a recording that best represents organized
//! autonomic recovery.
//!
//! Candidates of a fixed duration are stepped through the search region as
//! index ranges over the shared series. Each candidate with enough clean
//! beats is scored on heart-rate stability and position, and only those whose
//! short-range DFA exponent lies in the organized band are eligible.

use super::dfa;
use super::time::{calc_rmssd, clean_successive_differences};
use crate::config::{DfaConfig, WindowConfig};
use crate::error::Result;
use crate::pipeline::Deadline;
use crate::preprocessing::artifacts::{clean_count, clean_values, ArtifactFlag};
use crate::series::RRSeries;
use nalgebra::DVector;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Time span searched for a recovery window, in recording offsets.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRegion {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SearchRegion {
    pub fn full(series: &RRSeries) -> Self {
        Self {
            start_ms: series.start_ms(),
            end_ms: series.end_ms(),
        }
    }

    /// Region bounded by the sleep hints, clamped to the recording.
    ///
    /// A missing hint falls back to the recording boundary. Hints that do not
    /// leave a positive span are ignored.
    pub fn from_hints(
        series: &RRSeries,
        sleep_start_ms: Option<u64>,
        wake_time_ms: Option<u64>,
    ) -> Self {
        let full = Self::full(series);
        if let (Some(start), Some(wake)) = (sleep_start_ms, wake_time_ms) {
            if start >= wake {
                log::warn!("ignoring sleep hints: sleep start {start} ms is not before wake {wake} ms");
                return full;
            }
        }
        let clamp = |t: u64| t.clamp(full.start_ms, full.end_ms);
        let region = Self {
            start_ms: sleep_start_ms.map_or(full.start_ms, clamp),
            end_ms: wake_time_ms.map_or(full.end_ms, clamp),
        };
        if region.start_ms >= region.end_ms {
            log::warn!(
                "ignoring sleep hints: [{}, {}) ms does not overlap the recording",
                region.start_ms,
                region.end_ms
            );
            return full;
        }
        region
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Position of `t_ms` inside the region, clamped to `[0, 1]`.
    pub fn relative_position(&self, t_ms: u64) -> f64 {
        let duration = self.duration_ms();
        if duration == 0 {
            return 0.0;
        }
        (t_ms.saturating_sub(self.start_ms) as f64 / duration as f64).clamp(0.0, 1.0)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClassification {
    /// A candidate with alpha1 inside the organized band won the search.
    OrganizedRecovery,
    /// No candidate had enough clean beats, or the region is shorter than one window.
    FallbackFullRecording,
    /// Candidates were evaluated but none was organized.
    FallbackNoQualifyingWindow,
}

/// The sub-interval metrics are computed over.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisWindow {
    pub start_index: usize,
    /// Exclusive.
    pub end_index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub mean_hr: f64,
    /// Population SD of the instantaneous heart rate (bpm); lower is more stable.
    pub hr_stability: f64,
    pub dfa_alpha1: Option<f64>,
    pub dfa_alpha1_r_squared: Option<f64>,
    pub recovery_score: Option<f64>,
    pub selection_reason: String,
    pub relative_position: Option<f64>,
    pub classification: WindowClassification,
}

impl AnalysisWindow {
    pub fn range(&self) -> Range<usize> {
        self.start_index..self.end_index
    }
}

/// Outcome of a full window search.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSearch {
    pub best: Option<AnalysisWindow>,
    /// Candidates with enough clean beats to be scored.
    pub candidates_evaluated: usize,
    pub organized_count: usize,
}

/// Highest rolling RMSSD found inside a search region.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PeakHrv {
    pub rmssd: f64,
    pub start_index: usize,
    pub end_index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Start offsets and beat ranges of windows of `duration_ms` stepped by
/// `step_ms` through `region`. Only windows that fit entirely and hold at
/// least one beat are produced.
///
/// A beat belongs to the window its start time falls in. Steps that would
/// only cover a gap in the recording are skipped in one jump.
pub(crate) fn candidate_ranges(
    series: &RRSeries,
    region: &SearchRegion,
    duration_ms: u64,
    step_ms: u64,
) -> Vec<(u64, Range<usize>)> {
    let points = series.points();
    let mut out = Vec::new();
    if duration_ms == 0 || step_ms == 0 {
        return out;
    }
    let (mut lo, mut hi) = (0, 0);
    let mut start = region.start_ms;
    while let Some(end) = start
        .checked_add(duration_ms)
        .filter(|&end| end <= region.end_ms)
    {
        while lo < points.len() && points[lo].t_ms < start {
            lo += 1;
        }
        let Some(next) = points.get(lo) else {
            break;
        };
        if next.t_ms >= end {
            // first step whose window reaches the next beat
            let steps = (next.t_ms - end) / step_ms + 1;
            match steps
                .checked_mul(step_ms)
                .and_then(|jump| start.checked_add(jump))
            {
                Some(next_start) => start = next_start,
                None => break,
            }
            continue;
        }
        hi = hi.max(lo);
        while hi < points.len() && points[hi].t_ms < end {
            hi += 1;
        }
        out.push((start, lo..hi));
        match start.checked_add(step_ms) {
            Some(next_start) => start = next_start,
            None => break,
        }
    }
    out
}

/// Mean and population SD of the instantaneous heart rate of `rr` (ms).
fn hr_stats(rr: &[f64]) -> (f64, f64) {
    if rr.is_empty() {
        return (0.0, 0.0);
    }
    let hr = DVector::from_iterator(rr.len(), rr.iter().map(|v| 60_000.0 / v));
    (hr.mean(), hr.variance().sqrt())
}

struct Candidate {
    start_ms: u64,
    range: Range<usize>,
    mean_hr: f64,
    hr_stability: f64,
    alpha1: Option<dfa::DFAnalysis>,
    relative_position: f64,
    score: f64,
    organized: bool,
}

/// Locates the organized recovery window.
#[derive(Debug, Clone, Default)]
pub struct WindowSelector {
    pub config: WindowConfig,
    pub dfa: DfaConfig,
}

impl WindowSelector {
    pub fn new(config: WindowConfig, dfa: DfaConfig) -> Self {
        Self { config, dfa }
    }

    fn recovery_score(&self, hr_stability: f64, relative_position: f64) -> f64 {
        self.config.stability_weight / (1.0 + hr_stability)
            + self.config.position_weight
                * (1.0 - (relative_position - self.config.preferred_position).abs())
    }

    fn is_organized(&self, alpha1: f64) -> bool {
        (self.config.organized_alpha1_min..=self.config.organized_alpha1_max).contains(&alpha1)
    }

    fn evaluate(
        &self,
        series: &RRSeries,
        flags: &[ArtifactFlag],
        region: &SearchRegion,
        start_ms: u64,
        range: Range<usize>,
    ) -> Option<Candidate> {
        if clean_count(flags, range.clone()) < self.config.min_clean_beats {
            return None;
        }
        let rr = clean_values(&series.points()[range.clone()], &flags[range.clone()]);
        let (mean_hr, hr_stability) = hr_stats(&rr);
        let alpha1 = match dfa::short_term(&rr, &self.dfa) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                log::trace!("candidate at {start_ms} ms: DFA failed: {e}");
                None
            }
        };
        let organized = alpha1.as_ref().is_some_and(|a| self.is_organized(a.alpha));
        let relative_position = region.relative_position(start_ms);
        let score = self.recovery_score(hr_stability, relative_position);
        log::trace!(
            "candidate at {start_ms} ms: alpha1 {:?}, HR SD {hr_stability:.2}, score {score:.4}",
            alpha1.as_ref().map(|a| a.alpha)
        );
        Some(Candidate {
            start_ms,
            range,
            mean_hr,
            hr_stability,
            alpha1,
            relative_position,
            score,
            organized,
        })
    }

    /// Runs the search and reports how many candidates were scored and how
    /// many were organized.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `flags` is not aligned with `series`.
    pub fn search(
        &self,
        series: &RRSeries,
        flags: &[ArtifactFlag],
        region: &SearchRegion,
    ) -> Result<WindowSearch> {
        self.search_until(series, flags, region, &Deadline::unbounded())
    }

    /// Like [`search`](Self::search), failing with `AnalysisTimeout` as soon
    /// as a candidate is reached after `deadline` has passed.
    pub(crate) fn search_until(
        &self,
        series: &RRSeries,
        flags: &[ArtifactFlag],
        region: &SearchRegion,
        deadline: &Deadline,
    ) -> Result<WindowSearch> {
        super::check_window(series, flags, 0, series.len())?;
        let ranges = candidate_ranges(
            series,
            region,
            self.config.target_duration_ms,
            self.config.step_ms,
        );
        let scored: Vec<Option<Candidate>> = ranges
            .into_par_iter()
            .map(|(start_ms, range)| -> Result<Option<Candidate>> {
                deadline.check()?;
                Ok(self.evaluate(series, flags, region, start_ms, range))
            })
            .collect::<Result<_>>()?;
        let candidates: Vec<Candidate> = scored.into_iter().flatten().collect();

        let organized_count = candidates.iter().filter(|c| c.organized).count();
        // strict comparison keeps the earliest of equally scored candidates
        let best = candidates
            .iter()
            .filter(|c| c.organized)
            .fold(None, |best: Option<&Candidate>, c| match best {
                Some(b) if b.score >= c.score => Some(b),
                _ => Some(c),
            })
            .map(|c| self.to_window(series, c));

        log::debug!(
            "window search over [{}, {}) ms: {} candidates scored, {} organized",
            region.start_ms,
            region.end_ms,
            candidates.len(),
            organized_count
        );
        Ok(WindowSearch {
            best,
            candidates_evaluated: candidates.len(),
            organized_count,
        })
    }

    /// Best organized window inside the region given by the sleep hints, or
    /// `None` when no candidate qualifies.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `flags` is not aligned with `series`.
    pub fn find_best_window(
        &self,
        series: &RRSeries,
        flags: &[ArtifactFlag],
        sleep_start_ms: Option<u64>,
        wake_time_ms: Option<u64>,
    ) -> Result<Option<AnalysisWindow>> {
        let region = SearchRegion::from_hints(series, sleep_start_ms, wake_time_ms);
        Ok(self.search(series, flags, &region)?.best)
    }

    fn to_window(&self, series: &RRSeries, c: &Candidate) -> AnalysisWindow {
        let end_ms = (c.start_ms + self.config.target_duration_ms).min(series.end_ms());
        let alpha1 = c
            .alpha1
            .as_ref()
            .map_or_else(|| "n/a".to_owned(), |a| format!("{:.3}", a.alpha));
        AnalysisWindow {
            start_index: c.range.start,
            end_index: c.range.end,
            start_ms: c.start_ms,
            end_ms,
            mean_hr: c.mean_hr,
            hr_stability: c.hr_stability,
            dfa_alpha1: c.alpha1.as_ref().map(|a| a.alpha),
            dfa_alpha1_r_squared: c.alpha1.as_ref().map(|a| a.r_squared),
            recovery_score: Some(c.score),
            selection_reason: format!(
                "alpha1 {alpha1} within [{:.2}, {:.2}], HR SD {:.2} bpm, score {:.3}",
                self.config.organized_alpha1_min,
                self.config.organized_alpha1_max,
                c.hr_stability,
                c.score
            ),
            relative_position: Some(c.relative_position),
            classification: WindowClassification::OrganizedRecovery,
        }
    }

    /// Window spanning the whole recording, used when the search found
    /// nothing organized.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when `flags` is not aligned with `series`.
    pub fn fallback_window(
        &self,
        series: &RRSeries,
        flags: &[ArtifactFlag],
        classification: WindowClassification,
    ) -> Result<AnalysisWindow> {
        super::check_window(series, flags, 0, series.len())?;
        let range = 0..series.len();
        let rr = clean_values(series.points(), flags);
        let (mean_hr, hr_stability) = hr_stats(&rr);
        let alpha1 = dfa::short_term(&rr, &self.dfa).ok();
        let selection_reason = match classification {
            WindowClassification::FallbackNoQualifyingWindow => {
                "no candidate window had alpha1 in the organized band; using the full recording"
            }
            _ => "no candidate window had enough clean beats; using the full recording",
        };
        Ok(AnalysisWindow {
            start_index: range.start,
            end_index: range.end,
            start_ms: series.start_ms(),
            end_ms: series.end_ms(),
            mean_hr,
            hr_stability,
            dfa_alpha1: alpha1.as_ref().map(|a| a.alpha),
            dfa_alpha1_r_squared: alpha1.as_ref().map(|a| a.r_squared),
            recovery_score: None,
            selection_reason: selection_reason.to_owned(),
            relative_position: None,
            classification,
        })
    }
}

/// Highest rolling RMSSD over the windows of `config.peak_window_ms` inside
/// `region`. Windows with fewer than `config.peak_min_clean_beats` clean
/// beats are skipped; ties go to the earliest window.
pub fn find_peak_rmssd(
    series: &RRSeries,
    flags: &[ArtifactFlag],
    region: &SearchRegion,
    config: &WindowConfig,
) -> Option<PeakHrv> {
    if flags.len() != series.len() {
        return None;
    }
    let ranges = candidate_ranges(series, region, config.peak_window_ms, config.peak_step_ms);
    let scored: Vec<PeakHrv> = ranges
        .into_par_iter()
        .filter(|(_, range)| clean_count(flags, range.clone()) >= config.peak_min_clean_beats)
        .filter_map(|(start_ms, range)| {
            let diffs = clean_successive_differences(
                &series.points()[range.clone()],
                &flags[range.clone()],
            );
            Some(PeakHrv {
                rmssd: calc_rmssd(&diffs)?,
                start_index: range.start,
                end_index: range.end,
                start_ms,
                end_ms: start_ms + config.peak_window_ms,
            })
        })
        .collect();
    scored.into_iter().fold(None, |best, p| match best {
        Some(b) if b.rmssd >= p.rmssd => Some(b),
        _ => Some(p),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HrvError;
    use time::macros::datetime;

    fn series(rr: &[u32]) -> RRSeries {
        RRSeries::from_intervals(rr, datetime!(2024-01-01 22:00 UTC)).unwrap()
    }

    #[test]
    fn test_region_from_hints() {
        let s = series(&[1000; 600]);
        assert_eq!(
            SearchRegion::from_hints(&s, None, None),
            SearchRegion { start_ms: 0, end_ms: 600_000 }
        );
        assert_eq!(
            SearchRegion::from_hints(&s, Some(60_000), Some(900_000)),
            SearchRegion { start_ms: 60_000, end_ms: 600_000 }
        );
        assert_eq!(
            SearchRegion::from_hints(&s, Some(300_000), Some(100_000)),
            SearchRegion::full(&s)
        );
        assert_eq!(
            SearchRegion::from_hints(&s, Some(700_000), None),
            SearchRegion::full(&s)
        );
    }

    #[test]
    fn test_relative_position() {
        let region = SearchRegion { start_ms: 1000, end_ms: 3000 };
        assert_eq!(region.relative_position(1000), 0.0);
        assert_eq!(region.relative_position(2000), 0.5);
        assert_eq!(region.relative_position(5000), 1.0);
        assert_eq!(region.relative_position(0), 0.0);
    }

    #[test]
    fn test_candidate_ranges_match_binary_search() {
        let rr: Vec<u32> = (0..2000).map(|i| 700 + (i * 37 % 300) as u32).collect();
        let s = series(&rr);
        let region = SearchRegion::full(&s);
        let ranges = candidate_ranges(&s, &region, 300_000, 30_000);
        assert!(!ranges.is_empty());
        for (start, range) in &ranges {
            assert_eq!(*range, s.index_range(*start, start + 300_000));
            assert!(start + 300_000 <= region.end_ms);
        }
        assert_eq!(ranges[1].0 - ranges[0].0, 30_000);
    }

    #[test]
    fn test_short_region_has_no_candidates() {
        let s = series(&[1000; 200]);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let search = WindowSelector::default()
            .search(&s, &flags, &SearchRegion::full(&s))
            .unwrap();
        assert_eq!(search.candidates_evaluated, 0);
        assert_eq!(search.best, None);
    }

    #[test]
    fn test_misaligned_flags() {
        let s = series(&[1000; 200]);
        let flags = vec![ArtifactFlag::CLEAN; 10];
        assert!(matches!(
            WindowSelector::default().find_best_window(&s, &flags, None, None),
            Err(HrvError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_constant_rhythm_is_not_organized() {
        let s = series(&[1000; 900]);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let search = WindowSelector::default()
            .search(&s, &flags, &SearchRegion::full(&s))
            .unwrap();
        assert!(search.candidates_evaluated > 0);
        assert_eq!(search.organized_count, 0);
        assert_eq!(search.best, None);
    }

    #[test]
    fn test_recovery_score() {
        let selector = WindowSelector::default();
        assert!((selector.recovery_score(0.0, 0.4) - 1.0).abs() < 1e-12);
        assert!(selector.recovery_score(1.0, 0.4) < selector.recovery_score(0.5, 0.4));
        assert!(selector.recovery_score(1.0, 0.9) < selector.recovery_score(1.0, 0.5));
    }

    #[test]
    fn test_fallback_window() {
        let s = series(&[1000; 100]);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let w = WindowSelector::default()
            .fallback_window(&s, &flags, WindowClassification::FallbackFullRecording)
            .unwrap();
        assert_eq!(w.range(), 0..100);
        assert_eq!(w.recovery_score, None);
        assert_eq!(w.relative_position, None);
        assert!((w.mean_hr - 60.0).abs() < 1e-9);
        assert_eq!(w.hr_stability, 0.0);
    }

    #[test]
    fn test_peak_rmssd() {
        // 20 min steady, 5 min alternating, 20 min steady
        let mut rr = vec![1000u32; 1200];
        rr.extend((0..300).map(|i| if i % 2 == 0 { 980 } else { 1020 }));
        rr.extend(vec![1000u32; 1200]);
        let s = series(&rr);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let peak = find_peak_rmssd(&s, &flags, &SearchRegion::full(&s), &WindowConfig::default())
            .unwrap();
        assert!((peak.rmssd - 40.0).abs() < 1e-9);
        assert_eq!(peak.start_ms, 1_200_000);
        assert_eq!(peak.end_index - peak.start_index, 300);
    }

    #[test]
    fn test_peak_rmssd_needs_clean_beats() {
        let s = series(&[1000; 400]);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let config = WindowConfig {
            peak_min_clean_beats: 301,
            ..WindowConfig::default()
        };
        assert_eq!(find_peak_rmssd(&s, &flags, &SearchRegion::full(&s), &config), None);
    }

    fn gapped(gap_ms: u64) -> RRSeries {
        let mut builder = crate::series::RRSeriesBuilder::new(datetime!(2024-01-01 22:00 UTC));
        for i in 0..800u64 {
            let offset = if i < 400 { 0 } else { gap_ms };
            let rr = 950 + (i * 37 % 100) as u32;
            builder
                .push_point(crate::series::RRPoint::new(offset + (i % 400) * 1000, rr))
                .unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_candidate_ranges_jump_gaps() {
        let s = gapped(10_000_000_000);
        let region = SearchRegion::full(&s);
        let ranges = candidate_ranges(&s, &region, 300_000, 30_000);
        // about a dozen windows on either side of the gap
        assert!(ranges.len() < 40, "{} candidates", ranges.len());
        for (start, range) in &ranges {
            assert!(!range.is_empty());
            assert_eq!(*range, s.index_range(*start, start + 300_000));
            assert_eq!(start % 30_000, 0);
        }
        assert!(ranges.iter().any(|(start, _)| *start < 400_000));
        assert!(ranges.iter().any(|(start, _)| *start > 10_000_000_000 - 300_000));
    }

    #[test]
    fn test_search_stops_at_deadline() {
        let s = series(&[1000; 900]);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let selector = WindowSelector::default();
        let region = SearchRegion::full(&s);
        assert_eq!(
            selector.search_until(&s, &flags, &region, &Deadline::start(Some(0))),
            Err(HrvError::AnalysisTimeout { budget_ms: 0 })
        );
        assert!(selector
            .search_until(&s, &flags, &region, &Deadline::unbounded())
            .is_ok());
    }
}
