//! Respiration rate from respiratory sinus arrhythmia.
//!
//! The clean tachogram is placed on cumulative beat times, resampled,
//! detrended, and the largest periodogram peak inside the respiration band
//! is reported in breaths per minute.

use super::autonomic::{IndexEstimate, Unavailable};
use super::dfa::{DetrendAlgorithm, LinearDetrend};
use super::frequency::{periodogram, resample};
use crate::config::AnsConfig;

/// Signals whose detrended peak amplitude stays below this are treated as flat.
const FLAT_TOLERANCE_MS: f64 = 1e-9;

/// Respiration rate of the given clean intervals (ms).
pub fn respiration_rate(rr: &[f64], config: &AnsConfig) -> IndexEstimate {
    if let Some(short) =
        IndexEstimate::require_beats(rr.len(), config.respiration_min_beats.max(2))
    {
        return short;
    }
    let times: Vec<f64> = rr
        .iter()
        .scan(0.0, |t, &v| {
            *t += v / 1000.0;
            Some(*t)
        })
        .collect();
    let signal = resample(&times, rr, config.resample_hz);
    let detrended = match LinearDetrend.detrend(&signal) {
        Ok(d) => d,
        Err(e) => {
            log::debug!("respiration detrend failed: {e}");
            return IndexEstimate::Unavailable(Unavailable::ZeroVariance);
        }
    };
    if detrended.iter().all(|v| v.abs() < FLAT_TOLERANCE_MS) {
        return IndexEstimate::Unavailable(Unavailable::ZeroVariance);
    }

    let fft_len = config
        .respiration_fft_len
        .max(detrended.len().next_power_of_two());
    let spectrum = match periodogram(&detrended, config.resample_hz, fft_len) {
        Ok(s) => s,
        Err(e) => {
            log::debug!("respiration periodogram failed: {e}");
            return IndexEstimate::Unavailable(Unavailable::NoSpectralPeak);
        }
    };
    match spectrum.peak(&config.respiration_band) {
        Some(freq) => IndexEstimate::Available(freq * 60.0),
        None => IndexEstimate::Unavailable(Unavailable::NoSpectralPeak),
    }
}
