//! The immutable outcome of one analysis and its append-only builder.

use crate::analysis::autonomic::AnsMetrics;
use crate::analysis::frequency::FrequencyDomainMetrics;
use crate::analysis::nonlinear::NonlinearMetrics;
use crate::analysis::time::TimeDomainMetrics;
use crate::analysis::window::AnalysisWindow;
use crate::error::{HrvError, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Metric groups that can fail independently.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricGroup {
    TimeDomain,
    FrequencyDomain,
    Nonlinear,
}

/// Why a metric group is absent from a result.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFailure {
    pub group: MetricGroup,
    pub error: HrvError,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct HrvAnalysisResult {
    pub window: AnalysisWindow,
    pub time_domain: Option<TimeDomainMetrics>,
    pub frequency_domain: Option<FrequencyDomainMetrics>,
    pub nonlinear: Option<NonlinearMetrics>,
    pub ans: AnsMetrics,
    /// Percentage (0-100) of flagged beats inside the window.
    pub artifact_percentage: f64,
    pub clean_beat_count: usize,
    /// One entry per absent metric group.
    pub failures: Vec<MetricFailure>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub analyzed_at: OffsetDateTime,
}

impl HrvAnalysisResult {
    pub fn failure(&self, group: MetricGroup) -> Option<&HrvError> {
        self.failures
            .iter()
            .find(|f| f.group == group)
            .map(|f| &f.error)
    }
}

/// Collects engine outcomes one group at a time.
///
/// Each group is recorded once; later outcomes for an already recorded
/// group are dropped.
#[derive(Debug, Clone)]
pub struct HrvAnalysisResultBuilder {
    window: AnalysisWindow,
    artifact_percentage: f64,
    clean_beat_count: usize,
    analyzed_at: OffsetDateTime,
    time_domain: Option<TimeDomainMetrics>,
    frequency_domain: Option<FrequencyDomainMetrics>,
    nonlinear: Option<NonlinearMetrics>,
    failures: Vec<MetricFailure>,
}

impl HrvAnalysisResultBuilder {
    pub fn new(
        window: AnalysisWindow,
        artifact_percentage: f64,
        clean_beat_count: usize,
        analyzed_at: OffsetDateTime,
    ) -> Self {
        Self {
            window,
            artifact_percentage,
            clean_beat_count,
            analyzed_at,
            time_domain: None,
            frequency_domain: None,
            nonlinear: None,
            failures: Vec::new(),
        }
    }

    fn recorded(&self, group: MetricGroup) -> bool {
        let present = match group {
            MetricGroup::TimeDomain => self.time_domain.is_some(),
            MetricGroup::FrequencyDomain => self.frequency_domain.is_some(),
            MetricGroup::Nonlinear => self.nonlinear.is_some(),
        };
        present || self.failures.iter().any(|f| f.group == group)
    }

    /// Records the failure of `group`, or returns the value to store.
    fn accept<T>(&mut self, group: MetricGroup, outcome: Result<T>) -> Option<T> {
        if self.recorded(group) {
            log::debug!("{group:?} already recorded, ignoring new outcome");
            return None;
        }
        match outcome {
            Ok(value) => Some(value),
            Err(error) => {
                log::warn!("{group:?} metrics unavailable: {error}");
                self.failures.push(MetricFailure { group, error });
                None
            }
        }
    }

    pub fn time_domain(mut self, outcome: Result<TimeDomainMetrics>) -> Self {
        if let Some(m) = self.accept(MetricGroup::TimeDomain, outcome) {
            self.time_domain = Some(m);
        }
        self
    }

    pub fn frequency_domain(mut self, outcome: Result<FrequencyDomainMetrics>) -> Self {
        if let Some(m) = self.accept(MetricGroup::FrequencyDomain, outcome) {
            self.frequency_domain = Some(m);
        }
        self
    }

    pub fn nonlinear(mut self, outcome: Result<NonlinearMetrics>) -> Self {
        if let Some(m) = self.accept(MetricGroup::Nonlinear, outcome) {
            self.nonlinear = Some(m);
        }
        self
    }

    pub fn build(self, ans: AnsMetrics) -> HrvAnalysisResult {
        HrvAnalysisResult {
            window: self.window,
            time_domain: self.time_domain,
            frequency_domain: self.frequency_domain,
            nonlinear: self.nonlinear,
            ans,
            artifact_percentage: self.artifact_percentage,
            clean_beat_count: self.clean_beat_count,
            failures: self.failures,
            analyzed_at: self.analyzed_at,
        }
    }
}
