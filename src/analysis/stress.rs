//! Baevsky stress index.
//!
//! `SI = AMo / (2 · Mo · MxDMn)` where Mo is the centre of the modal
//! histogram bin (s), AMo the share of intervals in that bin (%) and MxDMn
//! the interval range (s).

use super::autonomic::{IndexEstimate, Unavailable};
use crate::config::AnsConfig;
use std::collections::BTreeMap;

/// Stress index of the given clean intervals (ms).
pub fn stress_index(rr: &[f64], config: &AnsConfig) -> IndexEstimate {
    if let Some(short) = IndexEstimate::require_beats(rr.len(), config.stress_min_beats.max(1)) {
        return short;
    }
    let min = rr.iter().copied().fold(f64::INFINITY, f64::min);
    let max = rr.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mxdmn = (max - min) / 1000.0;
    if mxdmn <= 0.0 {
        return IndexEstimate::Unavailable(Unavailable::ZeroVariance);
    }

    let mut histogram: BTreeMap<i64, usize> = BTreeMap::new();
    for &v in rr {
        *histogram
            .entry((v / config.stress_bin_ms).floor() as i64)
            .or_default() += 1;
    }
    // lowest bin wins ties
    let Some((bin, count)) = histogram
        .iter()
        .fold(None, |best: Option<(i64, usize)>, (&b, &c)| match best {
            Some((_, bc)) if bc >= c => best,
            _ => Some((b, c)),
        })
    else {
        return IndexEstimate::Unavailable(Unavailable::ZeroVariance);
    };

    let mode = (bin as f64 + 0.5) * config.stress_bin_ms / 1000.0;
    let amo = 100.0 * count as f64 / rr.len() as f64;
    let si = amo / (2.0 * mode * mxdmn);
    log::trace!("stress index {si:.1}: AMo {amo:.1}% Mo {mode:.3}s MxDMn {mxdmn:.3}s");
    IndexEstimate::Available(si)
}
