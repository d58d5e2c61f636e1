//! Beat-to-beat interval data model.
//!
//! An [`RRSeries`] is validated once at construction and immutable afterwards.
//! Live collectors append to an [`RRSeriesBuilder`] and freeze it when the
//! recording ends, so streamed and imported sessions reach the analyzers in
//! the same shape.

use crate::error::{HrvError, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::ops::Range;
use time::{Duration, OffsetDateTime};

/// A single beat: recording-relative start time and interval duration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RRPoint {
    pub t_ms: u64,
    pub rr_ms: u32,
    /// Instantaneous heart rate as reported by the sensor, if any.
    pub hr: Option<f64>,
}

impl RRPoint {
    pub fn new(t_ms: u64, rr_ms: u32) -> Self {
        Self {
            t_ms,
            rr_ms,
            hr: None,
        }
    }

    /// End of the beat, saturating at `u64::MAX`.
    pub fn end_ms(&self) -> u64 {
        self.t_ms.saturating_add(u64::from(self.rr_ms))
    }

    pub fn rr(&self) -> f64 {
        f64::from(self.rr_ms)
    }
}

/// Ordered RR intervals anchored to a wall-clock start.
#[derive(Debug, Clone, PartialEq)]
pub struct RRSeries {
    points: Vec<RRPoint>,
    start_date: OffsetDateTime,
}

impl RRSeries {
    /// Creates a series, rejecting zero intervals and decreasing timestamps.
    pub fn new(points: Vec<RRPoint>, start_date: OffsetDateTime) -> Result<Self> {
        if let Some(idx) = points.iter().position(|p| p.rr_ms == 0) {
            return Err(HrvError::InvalidInput(format!(
                "interval at index {idx} has zero duration"
            )));
        }
        if let Some(idx) = points.windows(2).position(|w| w[1].t_ms < w[0].t_ms) {
            return Err(HrvError::InvalidInput(format!(
                "timestamps decrease between index {idx} and {}",
                idx + 1
            )));
        }
        Ok(Self { points, start_date })
    }

    /// Builds a gap-free series from consecutive intervals starting at offset 0.
    pub fn from_intervals(rr_ms: &[u32], start_date: OffsetDateTime) -> Result<Self> {
        let mut builder = RRSeriesBuilder::new(start_date);
        for &rr in rr_ms {
            builder.push_interval(rr, None)?;
        }
        Ok(builder.build())
    }

    pub fn points(&self) -> &[RRPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start_date(&self) -> OffsetDateTime {
        self.start_date
    }

    /// Maps a recording-relative offset to wall-clock time.
    pub fn absolute_time(&self, offset_ms: u64) -> OffsetDateTime {
        let offset = i64::try_from(offset_ms).unwrap_or(i64::MAX);
        self.start_date + Duration::milliseconds(offset)
    }

    /// Start time of the first beat, 0 for an empty series.
    pub fn start_ms(&self) -> u64 {
        self.points.first().map_or(0, |p| p.t_ms)
    }

    /// End time of the last beat, 0 for an empty series.
    pub fn end_ms(&self) -> u64 {
        self.points.last().map_or(0, RRPoint::end_ms)
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms() - self.start_ms()
    }

    /// Index range of beats starting in `[from_ms, to_ms)`.
    pub fn index_range(&self, from_ms: u64, to_ms: u64) -> Range<usize> {
        let start = self.points.partition_point(|p| p.t_ms < from_ms);
        let end = self.points.partition_point(|p| p.t_ms < to_ms).max(start);
        start..end
    }
}

/// Append-only collector for live recordings.
#[derive(Debug, Clone)]
pub struct RRSeriesBuilder {
    points: Vec<RRPoint>,
    start_date: OffsetDateTime,
}

impl RRSeriesBuilder {
    pub fn new(start_date: OffsetDateTime) -> Self {
        Self {
            points: Vec::new(),
            start_date,
        }
    }

    /// Appends an interval directly after the previous beat.
    pub fn push_interval(&mut self, rr_ms: u32, hr: Option<f64>) -> Result<&mut Self> {
        let t_ms = self.points.last().map_or(0, RRPoint::end_ms);
        self.push_point(RRPoint { t_ms, rr_ms, hr })
    }

    /// Appends a beat with an explicit start time (gaps are allowed).
    pub fn push_point(&mut self, point: RRPoint) -> Result<&mut Self> {
        if point.rr_ms == 0 {
            return Err(HrvError::InvalidInput(
                "interval has zero duration".to_owned(),
            ));
        }
        if let Some(last) = self.points.last() {
            if point.t_ms < last.t_ms {
                return Err(HrvError::InvalidInput(format!(
                    "beat at {} ms precedes previous beat at {} ms",
                    point.t_ms, last.t_ms
                )));
            }
        }
        self.points.push(point);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn build(self) -> RRSeries {
        // every push was validated, so the invariants already hold
        RRSeries {
            points: self.points,
            start_date: self.start_date,
        }
    }
}
