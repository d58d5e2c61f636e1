//! Analysis parameters.
//!
//! All thresholds that change clinical output live here, with defaults that
//! reproduce the reference behaviour. Every struct deserializes from partial
//! documents (missing fields fall back to [`Default`]).

use crate::error::{HrvError, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Half-open frequency band `[low_hz, high_hz)`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    pub low_hz: f64,
    pub high_hz: f64,
}

impl FrequencyBand {
    pub const fn new(low_hz: f64, high_hz: f64) -> Self {
        Self { low_hz, high_hz }
    }

    pub fn contains(&self, freq: f64) -> bool {
        freq >= self.low_hz && freq < self.high_hz
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !(self.low_hz >= 0.0 && self.low_hz < self.high_hz) {
            return Err(HrvError::InvalidConfig(format!(
                "{name} band must satisfy 0 <= low < high, got [{}, {})",
                self.low_hz, self.high_hz
            )));
        }
        Ok(())
    }
}

/// Parameters of the artifact detector.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactConfig {
    /// Shortest physiologically plausible interval (inclusive).
    pub min_rr_ms: f64,
    /// Longest physiologically plausible interval (inclusive).
    pub max_rr_ms: f64,
    /// Number of surrounding intervals forming the local baseline.
    pub neighbour_beats: usize,
    /// Maximum tolerated relative deviation from the local baseline.
    pub max_relative_deviation: f64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            min_rr_ms: 300.0,
            max_rr_ms: 2000.0,
            neighbour_beats: 4,
            max_relative_deviation: 0.20,
        }
    }
}

/// Box sizes (in beats) for the short- and long-range DFA exponents.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct DfaConfig {
    pub short_min_box: usize,
    pub short_max_box: usize,
    pub long_min_box: usize,
    pub long_max_box: usize,
}

impl Default for DfaConfig {
    fn default() -> Self {
        Self {
            short_min_box: 4,
            short_max_box: 16,
            long_min_box: 16,
            long_max_box: 64,
        }
    }
}

impl DfaConfig {
    pub fn short_boxes(&self) -> Vec<usize> {
        (self.short_min_box..=self.short_max_box).collect()
    }

    pub fn long_boxes(&self) -> Vec<usize> {
        (self.long_min_box..=self.long_max_box).collect()
    }

    /// Beats needed before alpha1 can be estimated.
    pub fn short_min_beats(&self) -> usize {
        4 * self.short_max_box
    }

    /// Beats needed before alpha2 can be estimated.
    pub fn long_min_beats(&self) -> usize {
        4 * self.long_max_box
    }
}

/// Parameters of the recovery window search.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub target_duration_ms: u64,
    pub step_ms: u64,
    pub min_clean_beats: usize,
    /// Inclusive alpha1 band for organized recovery.
    pub organized_alpha1_min: f64,
    pub organized_alpha1_max: f64,
    pub stability_weight: f64,
    pub position_weight: f64,
    /// Relative position in the search region that scores best.
    pub preferred_position: f64,
    /// Length of the rolling windows used by the peak RMSSD lookup.
    pub peak_window_ms: u64,
    pub peak_step_ms: u64,
    pub peak_min_clean_beats: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            target_duration_ms: 300_000,
            step_ms: 30_000,
            min_clean_beats: 150,
            organized_alpha1_min: 0.75,
            organized_alpha1_max: 1.0,
            stability_weight: 0.7,
            position_weight: 0.3,
            preferred_position: 0.4,
            peak_window_ms: 300_000,
            peak_step_ms: 30_000,
            peak_min_clean_beats: 150,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDomainConfig {
    pub min_clean_beats: usize,
    /// Successive difference threshold for NN50/pNN50.
    pub nn_threshold_ms: f64,
    /// Histogram bin width for the triangular index (1/128 s).
    pub histogram_bin_ms: f64,
}

impl Default for TimeDomainConfig {
    fn default() -> Self {
        Self {
            min_clean_beats: 30,
            nn_threshold_ms: 50.0,
            histogram_bin_ms: 7.8125,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyDomainConfig {
    pub min_clean_beats: usize,
    pub resample_hz: f64,
    /// Welch segment length in resampled points.
    pub segment_len: usize,
    /// Fraction of a segment shared with the next one.
    pub overlap: f64,
    /// Longest span of clean beats that is resampled.
    pub max_span_ms: u64,
    pub vlf: FrequencyBand,
    pub lf: FrequencyBand,
    pub hf: FrequencyBand,
}

impl Default for FrequencyDomainConfig {
    fn default() -> Self {
        Self {
            min_clean_beats: 60,
            resample_hz: 4.0,
            segment_len: 512,
            overlap: 0.5,
            max_span_ms: 24 * 60 * 60 * 1000,
            vlf: FrequencyBand::new(0.0033, 0.04),
            lf: FrequencyBand::new(0.04, 0.15),
            hf: FrequencyBand::new(0.15, 0.40),
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct NonlinearConfig {
    pub min_clean_beats: usize,
    /// Template length for sample and approximate entropy.
    pub entropy_m: usize,
    /// Tolerance as a fraction of the series standard deviation.
    pub entropy_r_factor: f64,
    /// Entropy is evaluated over at most this many leading clean beats.
    pub entropy_max_beats: usize,
}

impl Default for NonlinearConfig {
    fn default() -> Self {
        Self {
            min_clean_beats: 120,
            entropy_m: 2,
            entropy_r_factor: 0.2,
            entropy_max_beats: 1000,
        }
    }
}

/// Parameters of the stress and respiration indices.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct AnsConfig {
    pub stress_min_beats: usize,
    pub stress_bin_ms: f64,
    pub respiration_min_beats: usize,
    pub respiration_band: FrequencyBand,
    pub resample_hz: f64,
    /// Minimum FFT length of the respiration periodogram (zero padded).
    pub respiration_fft_len: usize,
}

impl Default for AnsConfig {
    fn default() -> Self {
        Self {
            stress_min_beats: 30,
            stress_bin_ms: 50.0,
            respiration_min_beats: 60,
            respiration_band: FrequencyBand::new(0.10, 0.50),
            resample_hz: 4.0,
            respiration_fft_len: 1024,
        }
    }
}

/// Complete pipeline configuration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisConfig {
    pub artifacts: ArtifactConfig,
    pub dfa: DfaConfig,
    pub window: WindowConfig,
    pub time_domain: TimeDomainConfig,
    pub frequency_domain: FrequencyDomainConfig,
    pub nonlinear: NonlinearConfig,
    pub ans: AnsConfig,
    /// Per-session budget; `None` disables the check.
    pub time_budget_ms: Option<u64>,
}

impl AnalysisConfig {
    /// Checks the configuration for values the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(HrvError::InvalidConfig(msg.to_owned()));

        let a = &self.artifacts;
        if !(a.min_rr_ms > 0.0 && a.min_rr_ms < a.max_rr_ms) {
            return invalid("artifact bounds must satisfy 0 < min_rr_ms < max_rr_ms");
        }
        if a.neighbour_beats == 0 {
            return invalid("neighbour_beats must be at least 1");
        }
        if a.max_relative_deviation <= 0.0 {
            return invalid("max_relative_deviation must be positive");
        }

        let d = &self.dfa;
        if d.short_min_box < 4 || d.short_min_box >= d.short_max_box {
            return invalid("short DFA boxes must satisfy 4 <= min < max");
        }
        if d.long_min_box < 4 || d.long_min_box >= d.long_max_box {
            return invalid("long DFA boxes must satisfy 4 <= min < max");
        }

        let w = &self.window;
        if w.target_duration_ms == 0 || w.step_ms == 0 {
            return invalid("window duration and step must be positive");
        }
        if w.peak_window_ms == 0 || w.peak_step_ms == 0 {
            return invalid("peak window duration and step must be positive");
        }
        if w.organized_alpha1_min > w.organized_alpha1_max {
            return invalid("organized alpha1 band is empty");
        }
        if !(0.0..=1.0).contains(&w.preferred_position) {
            return invalid("preferred_position must lie in [0, 1]");
        }
        if w.stability_weight < 0.0 || w.position_weight < 0.0 {
            return invalid("score weights must be non-negative");
        }

        if self.time_domain.min_clean_beats < 2 {
            return invalid("time domain needs at least 2 clean beats");
        }
        if self.time_domain.histogram_bin_ms <= 0.0 {
            return invalid("histogram_bin_ms must be positive");
        }

        let f = &self.frequency_domain;
        if f.resample_hz <= 0.0 || f.segment_len < 16 {
            return invalid("resample_hz must be positive and segment_len at least 16");
        }
        if !(0.0..1.0).contains(&f.overlap) {
            return invalid("overlap must lie in [0, 1)");
        }
        if f.max_span_ms == 0 {
            return invalid("max_span_ms must be positive");
        }
        f.vlf.validate("VLF")?;
        f.lf.validate("LF")?;
        f.hf.validate("HF")?;
        if f.hf.high_hz > f.resample_hz / 2.0 {
            return invalid("HF band exceeds the Nyquist frequency");
        }

        let n = &self.nonlinear;
        if n.entropy_m == 0 || n.entropy_r_factor <= 0.0 {
            return invalid("entropy parameters must be positive");
        }

        let s = &self.ans;
        if s.stress_bin_ms <= 0.0 || s.resample_hz <= 0.0 {
            return invalid("stress bin width and resample rate must be positive");
        }
        s.respiration_band.validate("respiration")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_bounds() {
        let mut cfg = AnalysisConfig::default();
        cfg.artifacts.min_rr_ms = 2500.0;
        assert!(matches!(cfg.validate(), Err(HrvError::InvalidConfig(_))));
    }

    #[test]
    fn test_empty_alpha_band() {
        let mut cfg = AnalysisConfig::default();
        cfg.window.organized_alpha1_min = 1.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_band_above_nyquist() {
        let mut cfg = AnalysisConfig::default();
        cfg.frequency_domain.resample_hz = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_band_contains_is_half_open() {
        let band = FrequencyBand::new(0.04, 0.15);
        assert!(band.contains(0.04));
        assert!(!band.contains(0.15));
    }

    #[test]
    fn test_dfa_min_beats() {
        let cfg = DfaConfig::default();
        assert_eq!(cfg.short_boxes().len(), 13);
        assert_eq!(cfg.short_min_beats(), 64);
        assert_eq!(cfg.long_min_beats(), 256);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_document() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"window": {"organized_alpha1_min": 0.8}, "time_budget_ms": 500}"#)
                .unwrap();
        assert_eq!(cfg.window.organized_alpha1_min, 0.8);
        assert_eq!(cfg.window.organized_alpha1_max, 1.0);
        assert_eq!(cfg.time_budget_ms, Some(500));
        assert_eq!(cfg.artifacts, ArtifactConfig::default());
    }
}
