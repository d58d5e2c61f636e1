//! Derived autonomic nervous system indices.

use super::respiration::respiration_rate;
use super::stress::stress_index;
use super::window::PeakHrv;
use crate::config::AnsConfig;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Why an index could not be estimated.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    TooFewBeats { required: usize, available: usize },
    ZeroVariance,
    NoSpectralPeak,
}

/// Either a value or the reason there is none.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexEstimate {
    Available(f64),
    Unavailable(Unavailable),
}

impl IndexEstimate {
    pub fn value(&self) -> Option<f64> {
        match self {
            IndexEstimate::Available(v) => Some(*v),
            IndexEstimate::Unavailable(_) => None,
        }
    }

    pub(crate) fn require_beats(available: usize, required: usize) -> Option<Self> {
        (available < required).then_some(IndexEstimate::Unavailable(Unavailable::TooFewBeats {
            required,
            available,
        }))
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct AnsMetrics {
    /// Baevsky stress index.
    pub stress_index: IndexEstimate,
    /// Breaths per minute from respiratory sinus arrhythmia.
    pub respiration_rate: IndexEstimate,
    /// Highest rolling RMSSD inside the search region.
    pub peak_hrv: Option<PeakHrv>,
}

/// Computes the autonomic indices from the clean intervals of a window.
pub fn compute_ans(clean_rr: &[f64], config: &AnsConfig, peak_hrv: Option<PeakHrv>) -> AnsMetrics {
    AnsMetrics {
        stress_index: stress_index(clean_rr, config),
        respiration_rate: respiration_rate(clean_rr, config),
        peak_hrv,
    }
}
