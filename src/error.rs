//! Error taxonomy shared by the analysis engines and the pipeline.
//!
//! Numerical helpers (regression, detrending, DFA) report failures through
//! `anyhow`; the engines convert those into [`HrvError::Numerical`] so callers
//! only ever match on one enum.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an analysis step could not produce a value.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HrvError {
    /// Fewer clean beats than the metric needs.
    #[error("insufficient data: {available} clean beats available, {required} required")]
    InsufficientData { required: usize, available: usize },
    /// The caller-imposed time budget ran out between two pipeline stages.
    #[error("analysis exceeded its time budget of {budget_ms} ms")]
    AnalysisTimeout { budget_ms: u64 },
    /// Malformed input, e.g. non-monotonic timestamps or misaligned flags.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Configuration values that contradict each other.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A numerical routine failed on otherwise valid input.
    #[error("numerical failure: {0}")]
    Numerical(String),
}

impl From<anyhow::Error> for HrvError {
    fn from(err: anyhow::Error) -> Self {
        HrvError::Numerical(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HrvError>;

/// Returns `InsufficientData` unless `available >= required`.
pub(crate) fn require_beats(available: usize, required: usize) -> Result<()> {
    if available < required {
        Err(HrvError::InsufficientData {
            required,
            available,
        })
    } else {
        Ok(())
    }
}
