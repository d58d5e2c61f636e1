//! HRV (Heart Rate Variability) recovery analysis
//!
//! This crate turns a beat-to-beat RR interval recording into recovery
//! oriented HRV metrics. The pipeline rejects artifacts, searches the
//! recording for the window of organized autonomic recovery and computes
//! time-domain, frequency-domain and nonlinear metrics plus derived
//! autonomic indices over it.
//!
//! # Example
//! ```rust
//! use hrv_recovery::pipeline::{HrvAnalyzer, SleepHints};
//! use hrv_recovery::series::RRSeries;
//! use time::OffsetDateTime;
//!
//! let rr: Vec<u32> = (0..400).map(|i| 800 + (i * 7 % 40)).collect();
//! let series = RRSeries::from_intervals(&rr, OffsetDateTime::UNIX_EPOCH).unwrap();
//! let analysis = HrvAnalyzer::default()
//!     .analyze(&series, SleepHints::default())
//!     .unwrap();
//! println!("{:?}", analysis.result.window.classification);
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod preprocessing;
pub mod result;
pub mod series;

pub use config::AnalysisConfig;
pub use error::{HrvError, Result};
pub use pipeline::{HrvAnalyzer, SleepHints};
pub use result::HrvAnalysisResult;
pub use series::{RRPoint, RRSeries, RRSeriesBuilder};
