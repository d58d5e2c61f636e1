//! Frequency-domain HRV metrics.
//!
//! Clean beats are placed at the time they complete, linearly interpolated
//! onto an even grid (artifacts are bridged, not dropped), linearly
//! detrended, and fed to a Welch averaged periodogram. Band powers are in
//! ms², the power spectral density in ms²/Hz.

use super::dfa::{DetrendAlgorithm, LinearDetrend};
use crate::config::{FrequencyBand, FrequencyDomainConfig};
use crate::error::{require_beats, HrvError, Result as HrvResult};
use crate::preprocessing::artifacts::ArtifactFlag;
use crate::series::{RRPoint, RRSeries};
use anyhow::anyhow;
use anyhow::Result;
use realfft::RealFftPlanner;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Spectral statistics of one analysis window.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyDomainMetrics {
    pub vlf: f64,
    pub lf: f64,
    pub hf: f64,
    /// VLF + LF + HF.
    pub total_power: f64,
    /// Absent when there is no HF power.
    pub lf_hf: Option<f64>,
    /// LF in normalized units, absent when LF + HF is zero.
    pub lf_nu: Option<f64>,
    pub hf_nu: Option<f64>,
    pub lf_peak_hz: Option<f64>,
    pub hf_peak_hz: Option<f64>,
}

/// One-sided power spectral density.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub freqs: Vec<f64>,
    pub density: Vec<f64>,
}

impl Spectrum {
    fn resolution(&self) -> f64 {
        match self.freqs.get(1) {
            Some(f) => *f,
            None => 0.0,
        }
    }

    /// Integrated power of `band`.
    pub fn band_power(&self, band: &FrequencyBand) -> f64 {
        let df = self.resolution();
        self.freqs
            .iter()
            .zip(&self.density)
            .filter(|(f, _)| band.contains(**f))
            .map(|(_, p)| p * df)
            .sum()
    }

    /// Frequency of the largest density inside `band`, if that density is
    /// positive. Ties go to the lower frequency.
    pub fn peak(&self, band: &FrequencyBand) -> Option<f64> {
        self.freqs
            .iter()
            .zip(&self.density)
            .filter(|(f, p)| band.contains(**f) && **p > 0.0)
            .fold(None, |best: Option<(f64, f64)>, (&f, &p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((f, p)),
            })
            .map(|(f, _)| f)
    }
}

/// Linearly interpolates `(time_s, value)` samples onto a grid of `fs` Hz
/// starting at the first sample.
pub(crate) fn resample(times: &[f64], values: &[f64], fs: f64) -> Vec<f64> {
    let (Some(&t0), Some(&t_last)) = (times.first(), times.last()) else {
        return Vec::new();
    };
    let n = ((t_last - t0) * fs).floor() as usize + 1;
    let mut out = Vec::with_capacity(n);
    let mut k = 0;
    for i in 0..n {
        let t = t0 + i as f64 / fs;
        while k + 2 < times.len() && times[k + 1] < t {
            k += 1;
        }
        if times.len() == 1 {
            out.push(values[0]);
            continue;
        }
        let (ta, tb) = (times[k], times[k + 1]);
        let frac = if tb > ta {
            ((t - ta) / (tb - ta)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(values[k] + frac * (values[k + 1] - values[k]));
    }
    out
}

/// Periodic Hann window.
pub(crate) fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / size as f64).cos()))
        .collect()
}

/// Hann-windowed, mean-removed periodogram of `frame`, zero padded to
/// `fft_len`. Density scaling, one-sided.
pub(crate) fn periodogram(frame: &[f64], fs: f64, fft_len: usize) -> Result<Spectrum> {
    if frame.is_empty() || fft_len < frame.len() {
        return Err(anyhow!("FFT length must cover a non-empty frame"));
    }
    let window = hann(frame.len());
    let mean = frame.iter().sum::<f64>() / frame.len() as f64;
    let mut buffer = vec![0.0; fft_len];
    for ((dst, &x), &w) in buffer.iter_mut().zip(frame).zip(&window) {
        *dst = (x - mean) * w;
    }
    let norm = fs * window.iter().map(|w| w * w).sum::<f64>();

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(fft_len);
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut buffer, &mut spectrum)
        .map_err(|e| anyhow!("FFT failed: {e}"))?;

    let nyquist_bin = (fft_len % 2 == 0).then_some(fft_len / 2);
    let density = spectrum
        .iter()
        .enumerate()
        .map(|(k, c)| {
            let p = c.norm_sqr() / norm;
            if k == 0 || Some(k) == nyquist_bin {
                p
            } else {
                2.0 * p
            }
        })
        .collect();
    let freqs = (0..spectrum.len())
        .map(|k| k as f64 * fs / fft_len as f64)
        .collect();
    Ok(Spectrum { freqs, density })
}

/// Welch averaged periodogram with `segment_len` point segments.
pub fn welch(signal: &[f64], fs: f64, segment_len: usize, overlap: f64) -> Result<Spectrum> {
    if segment_len == 0 || signal.len() < segment_len {
        return Err(anyhow!(
            "Signal of {} points is shorter than one segment of {}",
            signal.len(),
            segment_len
        ));
    }
    let step = ((segment_len as f64 * (1.0 - overlap)).round() as usize).max(1);
    let mut accumulated: Option<Spectrum> = None;
    let mut segments = 0usize;
    let mut pos = 0;
    while pos + segment_len <= signal.len() {
        let current = periodogram(&signal[pos..pos + segment_len], fs, segment_len)?;
        accumulated = Some(match accumulated {
            None => current,
            Some(mut acc) => {
                for (a, p) in acc.density.iter_mut().zip(&current.density) {
                    *a += p;
                }
                acc
            }
        });
        segments += 1;
        pos += step;
    }
    let mut spectrum = accumulated.ok_or_else(|| anyhow!("No complete Welch segment"))?;
    for p in spectrum.density.iter_mut() {
        *p /= segments as f64;
    }
    Ok(spectrum)
}

/// Evenly sampled, detrended tachogram of the clean beats among index
/// aligned `points` and `flags`.
///
/// Each clean interval is placed at the end of its beat.
pub(crate) fn clean_tachogram(points: &[RRPoint], flags: &[ArtifactFlag], fs: f64) -> Result<Vec<f64>> {
    let (times, values): (Vec<f64>, Vec<f64>) = points
        .iter()
        .zip(flags)
        .filter(|(_, f)| f.is_clean())
        .map(|(p, _)| (p.end_ms() as f64 / 1000.0, p.rr()))
        .unzip();
    let resampled = resample(&times, &values, fs);
    LinearDetrend.detrend(&resampled)
}

/// Time between the first and the last clean beat end.
fn clean_span_ms(points: &[RRPoint], flags: &[ArtifactFlag]) -> u64 {
    let mut ends = points
        .iter()
        .zip(flags)
        .filter(|(_, f)| f.is_clean())
        .map(|(p, _)| p.end_ms());
    match ends.next() {
        Some(first) => ends.last().map_or(0, |last| last - first),
        None => 0,
    }
}

/// Computes VLF, LF and HF power over the clean beats of `[start, end)`.
///
/// # Errors
///
/// `InsufficientData` when fewer than `config.min_clean_beats` clean beats
/// are available, or when the resampled window is shorter than one Welch
/// segment (`required`/`available` then count resampled points).
/// `InvalidInput` when the clean beats span more than `config.max_span_ms`.
pub fn compute_frequency_domain(
    series: &RRSeries,
    flags: &[ArtifactFlag],
    start: usize,
    end: usize,
    config: &FrequencyDomainConfig,
) -> HrvResult<FrequencyDomainMetrics> {
    super::check_window(series, flags, start, end)?;
    let (points, flags) = (&series.points()[start..end], &flags[start..end]);
    let clean = flags.iter().filter(|f| f.is_clean()).count();
    require_beats(clean, config.min_clean_beats.max(2))?;

    let span_ms = clean_span_ms(points, flags);
    if span_ms > config.max_span_ms {
        return Err(HrvError::InvalidInput(format!(
            "clean beats span {span_ms} ms, more than the {} ms that are resampled",
            config.max_span_ms
        )));
    }
    let signal = clean_tachogram(points, flags, config.resample_hz)?;
    if signal.len() < config.segment_len {
        return Err(HrvError::InsufficientData {
            required: config.segment_len,
            available: signal.len(),
        });
    }
    let spectrum = welch(&signal, config.resample_hz, config.segment_len, config.overlap)?;

    let vlf = spectrum.band_power(&config.vlf);
    let lf = spectrum.band_power(&config.lf);
    let hf = spectrum.band_power(&config.hf);
    let lf_hf_sum = lf + hf;
    log::trace!("spectrum: vlf {vlf:.1} lf {lf:.1} hf {hf:.1} ms²");

    Ok(FrequencyDomainMetrics {
        vlf,
        lf,
        hf,
        total_power: vlf + lf + hf,
        lf_hf: (hf > 0.0).then(|| lf / hf),
        lf_nu: (lf_hf_sum > 0.0).then(|| 100.0 * lf / lf_hf_sum),
        hf_nu: (lf_hf_sum > 0.0).then(|| 100.0 * hf / lf_hf_sum),
        lf_peak_hz: spectrum.peak(&config.lf),
        hf_peak_hz: spectrum.peak(&config.hf),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::artifacts::ArtifactReason;
    use crate::series::RRSeriesBuilder;
    use time::macros::datetime;

    /// Beats whose interval follows `base + amp * sin(2π f t)`.
    fn modulated(beats: usize, base: f64, amp: f64, freq_hz: f64) -> RRSeries {
        let mut t = 0.0;
        let rr: Vec<u32> = (0..beats)
            .map(|_| {
                let rr = (base + amp * (2.0 * PI * freq_hz * t / 1000.0).sin()).round();
                t += rr;
                rr as u32
            })
            .collect();
        RRSeries::from_intervals(&rr, datetime!(2024-01-01 0:00 UTC)).unwrap()
    }

    #[test]
    fn test_resample_linear() {
        let out = resample(&[0.0, 1.0, 2.0], &[0.0, 10.0, 0.0], 4.0);
        assert_eq!(out.len(), 9);
        assert!((out[2] - 5.0).abs() < 1e-12);
        assert!((out[4] - 10.0).abs() < 1e-12);
        assert!((out[6] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_welch_too_short() {
        assert!(welch(&[0.0; 100], 4.0, 512, 0.5).is_err());
    }

    #[test]
    fn test_sine_power_in_band() {
        let fs = 4.0;
        let signal: Vec<f64> = (0..2048)
            .map(|i| 30.0 * (2.0 * PI * 0.25 * i as f64 / fs).sin())
            .collect();
        let spectrum = welch(&signal, fs, 512, 0.5).unwrap();
        let power = spectrum.band_power(&FrequencyBand::new(0.15, 0.40));
        // a sine of amplitude A carries A²/2
        assert!((power - 450.0).abs() < 0.05 * 450.0, "power was {power}");
        assert_eq!(spectrum.peak(&FrequencyBand::new(0.15, 0.40)), Some(0.25));
    }

    #[test]
    fn test_hf_dominant_series() {
        let s = modulated(400, 1000.0, 40.0, 0.25);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let m = compute_frequency_domain(&s, &flags, 0, s.len(), &FrequencyDomainConfig::default())
            .unwrap();
        assert!(m.hf > 10.0 * m.lf, "lf {} hf {}", m.lf, m.hf);
        assert!(m.lf_hf.unwrap() < 0.1);
        let peak = m.hf_peak_hz.unwrap();
        assert!((peak - 0.25).abs() < 0.02, "peak was {peak}");
        assert!((m.lf_nu.unwrap() + m.hf_nu.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_lf_dominant_series() {
        let s = modulated(400, 1000.0, 40.0, 0.1);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let m = compute_frequency_domain(&s, &flags, 0, s.len(), &FrequencyDomainConfig::default())
            .unwrap();
        assert!(m.lf_hf.unwrap() > 10.0);
        let peak = m.lf_peak_hz.unwrap();
        assert!((peak - 0.1).abs() < 0.02, "peak was {peak}");
    }

    #[test]
    fn test_artifact_bridged() {
        let s = modulated(400, 1000.0, 40.0, 0.25);
        let all_clean = vec![ArtifactFlag::CLEAN; s.len()];
        let mut flags = all_clean.clone();
        flags[200] = ArtifactFlag::artifact(ArtifactReason::RhythmDeviation);
        let config = FrequencyDomainConfig::default();
        let clean = compute_frequency_domain(&s, &all_clean, 0, s.len(), &config).unwrap();
        let bridged = compute_frequency_domain(&s, &flags, 0, s.len(), &config).unwrap();
        assert!((bridged.hf - clean.hf).abs() < 0.1 * clean.hf);
    }

    #[test]
    fn test_flat_series() {
        let s = RRSeries::from_intervals(&[1000; 400], datetime!(2024-01-01 0:00 UTC)).unwrap();
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let m = compute_frequency_domain(&s, &flags, 0, s.len(), &FrequencyDomainConfig::default())
            .unwrap();
        assert_eq!(m.total_power, 0.0);
        assert_eq!(m.lf_hf, None);
        assert_eq!(m.lf_nu, None);
        assert_eq!(m.hf_peak_hz, None);
    }

    #[test]
    fn test_short_window() {
        let s = modulated(100, 1000.0, 40.0, 0.25);
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let config = FrequencyDomainConfig::default();
        assert!(matches!(
            compute_frequency_domain(&s, &flags, 0, s.len(), &config),
            Err(HrvError::InsufficientData { required: 512, .. })
        ));
        assert!(matches!(
            compute_frequency_domain(&s, &flags, 0, 50, &config),
            Err(HrvError::InsufficientData { required: 60, available: 50 })
        ));
    }

    #[test]
    fn test_span_limit() {
        let mut builder = RRSeriesBuilder::new(datetime!(2024-01-01 0:00 UTC));
        for i in 0..800u64 {
            let offset = if i < 400 { 0 } else { 10_000_000_000 };
            builder.push_point(RRPoint::new(offset + (i % 400) * 1000, 1000)).unwrap();
        }
        let s = builder.build();
        let flags = vec![ArtifactFlag::CLEAN; s.len()];
        let config = FrequencyDomainConfig::default();
        assert!(matches!(
            compute_frequency_domain(&s, &flags, 0, s.len(), &config),
            Err(HrvError::InvalidInput(_))
        ));
        // either side of the gap alone is well within the limit
        assert!(!matches!(
            compute_frequency_domain(&s, &flags, 0, 400, &config),
            Err(HrvError::InvalidInput(_))
        ));
    }
}
