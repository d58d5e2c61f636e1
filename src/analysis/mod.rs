/// This module contains the metric engines of the recovery analysis.
///
/// The available submodules are:
///
/// - `dfa`: Detrended Fluctuation Analysis shared by the window search and nonlinear metrics.
/// - `window`: Search for the organized recovery window inside a recording.
/// - `time`: Time-domain metrics.
/// - `frequency`: Welch power spectrum and band powers.
/// - `nonlinear`: Poincaré, entropy and DFA metrics.
/// - `stress`, `respiration`: Derived autonomic indices, collected in `autonomic`.
pub mod autonomic;
pub mod dfa;
pub mod frequency;
pub mod nonlinear;
pub mod respiration;
pub mod stress;
pub mod time;
pub mod window;

pub(crate) use crate::preprocessing::artifacts::check_window;
