#![allow(dead_code)]

use hrv_recovery::series::{RRSeries, RRSeriesBuilder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use time::macros::datetime;
use time::OffsetDateTime;

pub const MINUTE_MS: u64 = 60_000;
pub const HOUR_MS: u64 = 60 * MINUTE_MS;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn recording_start() -> OffsetDateTime {
    datetime!(2024-03-01 22:30 UTC)
}

/// Collects intervals from `next` until `duration_ms` is covered.
fn generate<F>(duration_ms: u64, mut next: F) -> RRSeries
where
    F: FnMut(u64) -> u32,
{
    let mut builder = RRSeriesBuilder::new(recording_start());
    let mut t = 0u64;
    while t < duration_ms {
        let rr = next(t);
        builder
            .push_interval(rr, None)
            .expect("generated intervals are positive");
        t += u64::from(rr);
    }
    builder.build()
}

/// Uncorrelated intervals uniform in `center ± amplitude`.
pub fn white_noise(seed: u64, duration_ms: u64, center: f64, amplitude: f64) -> RRSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    generate(duration_ms, |_| {
        (center + rng.gen_range(-amplitude..amplitude)).round() as u32
    })
}

/// Short-range correlated rhythm around 900 ms whose alpha1 falls in the
/// organized band.
pub fn organized_rhythm(seed: u64, duration_ms: u64) -> RRSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = 0.0f64;
    generate(duration_ms, |_| {
        x = (0.4 * x + rng.gen_range(-2.0..2.0)).clamp(-5.0, 5.0);
        (900.0 + x).round() as u32
    })
}

/// Alternating rhythm with small jitter; strongly anti-correlated, so alpha1
/// stays far below the organized band.
pub fn anti_persistent(seed: u64, duration_ms: u64) -> RRSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut up = false;
    generate(duration_ms, |_| {
        up = !up;
        let swing: f64 = if up { 20.0 } else { -20.0 };
        (800.0 + swing + rng.gen_range(-3.0..3.0)).round() as u32
    })
}

/// Eight hour night of 800 ± 20 ms white noise with a ten minute organized
/// segment at 900 ms starting four hours in. Returns the series and the time
/// span of the segment.
pub fn night_with_recovery_segment(seed: u64) -> (RRSeries, Range<u64>) {
    let segment = 4 * HOUR_MS..4 * HOUR_MS + 10 * MINUTE_MS;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut x = 0.0f64;
    let series = generate(8 * HOUR_MS, |t| {
        let rr = if segment.contains(&t) {
            x = (0.4 * x + rng.gen_range(-2.0..2.0)).clamp(-5.0, 5.0);
            900.0 + x
        } else {
            800.0 + rng.gen_range(-20.0..20.0)
        };
        rr.round() as u32
    });
    (series, segment)
}

/// Intervals (ms) of the beats starting inside `span`.
pub fn intervals_in(series: &RRSeries, span: &Range<u64>) -> Vec<f64> {
    series.points()[series.index_range(span.start, span.end)]
        .iter()
        .map(|p| p.rr())
        .collect()
}

pub fn rmssd(rr: &[f64]) -> f64 {
    let sum: f64 = rr.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    (sum / (rr.len() - 1) as f64).sqrt()
}
