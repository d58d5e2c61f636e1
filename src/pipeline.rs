//! End-to-end analysis: artifact detection, window selection, metric engines
//! and result assembly, for single sessions and batches.

use crate::analysis::autonomic::compute_ans;
use crate::analysis::frequency::compute_frequency_domain;
use crate::analysis::nonlinear::compute_nonlinear;
use crate::analysis::time::compute_time_domain;
use crate::analysis::window::{
    find_peak_rmssd, SearchRegion, WindowClassification, WindowSelector,
};
use crate::config::AnalysisConfig;
use crate::error::{require_beats, HrvError, Result};
use crate::preprocessing::artifacts::{
    artifact_percentage, clean_count, clean_rr_values, detect_artifacts, ArtifactFlag,
};
use crate::result::{HrvAnalysisResult, HrvAnalysisResultBuilder};
use crate::series::RRSeries;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;

/// Optional sleep boundaries, as offsets into the recording.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SleepHints {
    pub sleep_start_ms: Option<u64>,
    pub wake_time_ms: Option<u64>,
}

/// Flags and result of one analysed session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAnalysis {
    pub artifact_flags: Vec<ArtifactFlag>,
    pub result: HrvAnalysisResult,
}

/// One recording queued for batch analysis.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub series: RRSeries,
    pub hints: SleepHints,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub id: String,
    pub analysis: Result<SessionAnalysis>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Outcomes of the sessions that were started, in input order.
    pub outcomes: Vec<SessionOutcome>,
    /// Whether cancellation left sessions unprocessed.
    pub cancelled: bool,
}

/// Shared flag that stops a batch before its next session starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wall-clock budget of one session analysis.
pub(crate) struct Deadline {
    started: Instant,
    budget_ms: Option<u64>,
}

impl Deadline {
    pub(crate) fn start(budget_ms: Option<u64>) -> Self {
        Self {
            started: Instant::now(),
            budget_ms,
        }
    }

    pub(crate) fn unbounded() -> Self {
        Self::start(None)
    }

    /// `AnalysisTimeout` once the budget is spent.
    pub(crate) fn check(&self) -> Result<()> {
        match self.budget_ms {
            Some(budget_ms) if self.started.elapsed() >= Duration::from_millis(budget_ms) => {
                Err(HrvError::AnalysisTimeout { budget_ms })
            }
            _ => Ok(()),
        }
    }

    fn checkpoint(&self, stage: &str) -> Result<()> {
        self.check()
            .inspect_err(|_| log::warn!("time budget exhausted before {stage}"))
    }
}

/// Stateless analysis pipeline.
#[derive(Debug, Clone, Default)]
pub struct HrvAnalyzer {
    config: AnalysisConfig,
}

impl HrvAnalyzer {
    /// # Errors
    ///
    /// `InvalidConfig` when `config` fails validation.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyses `series`, stamping the result with the current time.
    pub fn analyze(&self, series: &RRSeries, hints: SleepHints) -> Result<SessionAnalysis> {
        self.analyze_at(series, hints, OffsetDateTime::now_utc())
    }

    /// Analyses `series`, stamping the result with `analyzed_at`.
    ///
    /// # Errors
    ///
    /// `InsufficientData` when the analysis window holds fewer than two clean
    /// beats, `AnalysisTimeout` when the time budget runs out between stages.
    /// Individual metric groups fail into `HrvAnalysisResult::failures`.
    pub fn analyze_at(
        &self,
        series: &RRSeries,
        hints: SleepHints,
        analyzed_at: OffsetDateTime,
    ) -> Result<SessionAnalysis> {
        let deadline = Deadline::start(self.config.time_budget_ms);
        let cfg = &self.config;

        let flags = detect_artifacts(series, &cfg.artifacts);
        deadline.checkpoint("window selection")?;

        let selector = WindowSelector::new(cfg.window.clone(), cfg.dfa.clone());
        let region = SearchRegion::from_hints(series, hints.sleep_start_ms, hints.wake_time_ms);
        let search = selector
            .search_until(series, &flags, &region, &deadline)
            .inspect_err(|e| log::warn!("window search failed: {e}"))?;
        let window = match search.best {
            Some(window) => window,
            None => {
                let classification = if search.candidates_evaluated == 0 {
                    WindowClassification::FallbackFullRecording
                } else {
                    WindowClassification::FallbackNoQualifyingWindow
                };
                selector.fallback_window(series, &flags, classification)?
            }
        };
        log::debug!(
            "analysis window {:?}: beats {}..{}, {}",
            window.classification,
            window.start_index,
            window.end_index,
            window.selection_reason
        );

        let range = window.range();
        let clean_beats = clean_count(&flags, range.clone());
        require_beats(clean_beats, 2)?;
        let builder = HrvAnalysisResultBuilder::new(
            window,
            artifact_percentage(&flags, range.clone())?,
            clean_beats,
            analyzed_at,
        );

        deadline.checkpoint("time domain")?;
        let builder = builder.time_domain(compute_time_domain(
            series,
            &flags,
            range.start,
            range.end,
            &cfg.time_domain,
        ));
        deadline.checkpoint("frequency domain")?;
        let builder = builder.frequency_domain(compute_frequency_domain(
            series,
            &flags,
            range.start,
            range.end,
            &cfg.frequency_domain,
        ));
        deadline.checkpoint("nonlinear")?;
        let builder = builder.nonlinear(compute_nonlinear(
            series,
            &flags,
            range.start,
            range.end,
            &cfg.nonlinear,
            &cfg.dfa,
        ));
        deadline.checkpoint("autonomic indices")?;
        let peak = find_peak_rmssd(series, &flags, &region, &cfg.window);
        let ans = compute_ans(
            &clean_rr_values(series, &flags, range)?,
            &cfg.ans,
            peak,
        );

        let result = builder.build(ans);
        log::debug!(
            "analysis complete: {} clean beats, {} metric group(s) failed",
            result.clean_beat_count,
            result.failures.len()
        );
        Ok(SessionAnalysis {
            artifact_flags: flags,
            result,
        })
    }

    fn run_session(&self, session: &Session) -> SessionOutcome {
        SessionOutcome {
            id: session.id.clone(),
            analysis: self.analyze(&session.series, session.hints),
        }
    }

    /// Analyses `sessions` one after another, calling `on_done` after each.
    ///
    /// Cancellation is checked before every session; a started session
    /// always completes.
    pub fn analyze_batch<F>(
        &self,
        sessions: &[Session],
        cancel: &CancellationToken,
        mut on_done: F,
    ) -> BatchReport
    where
        F: FnMut(&SessionOutcome),
    {
        let mut outcomes = Vec::with_capacity(sessions.len());
        for (i, session) in sessions.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("batch cancelled after {i} of {} sessions", sessions.len());
                return BatchReport {
                    outcomes,
                    cancelled: true,
                };
            }
            let outcome = self.run_session(session);
            log::info!(
                "session {} analysed ({}/{})",
                outcome.id,
                i + 1,
                sessions.len()
            );
            on_done(&outcome);
            outcomes.push(outcome);
            std::thread::yield_now();
        }
        BatchReport {
            outcomes,
            cancelled: false,
        }
    }

    /// Analyses `sessions` on the rayon pool. Outcomes keep input order.
    pub fn analyze_batch_parallel(
        &self,
        sessions: &[Session],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let outcomes: Vec<Option<SessionOutcome>> = sessions
            .par_iter()
            .map(|session| (!cancel.is_cancelled()).then(|| self.run_session(session)))
            .collect();
        let started = outcomes.iter().filter(|o| o.is_some()).count();
        log::info!("parallel batch: {started} of {} sessions analysed", sessions.len());
        BatchReport {
            cancelled: started < sessions.len(),
            outcomes: outcomes.into_iter().flatten().collect(),
        }
    }
}
