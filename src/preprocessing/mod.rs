//! This module contains the preprocessing applied before any metric is computed.
//!
//! The `artifacts` submodule flags physiologically implausible or
//! noise-corrupted intervals; the engines only ever see the clean beats.
pub mod artifacts;
