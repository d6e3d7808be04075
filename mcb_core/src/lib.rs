#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Multichannel-buffer acquisition core (hardware-agnostic).
//!
//! Every device interaction goes through the `mcb_traits::Transport` trait,
//! borrowed mutably for the duration of a call.
//!
//! ## Architecture
//!
//! - **Protocol**: typed commands and queries over `Transport::comm`, with a
//!   declared response layout per query (`protocol` module)
//! - **Calibration**: channel to energy quadratic from up to three points
//! - **Rebin / Peak fit**: display rebinning and per-ROI Gaussian fits
//! - **Dead time**: sliding window over real/live deltas
//! - **Spectrum files**: `.Spe` reader and writer (`spe` module)
//! - **Session / Station**: per-detector cached state, UI commands and the
//!   multi-detector poll loop
//!
//! ## Time
//!
//! The device counts in 20 ms ticks; everything above the protocol layer
//! works in milliseconds. See `util::ticks_to_ms`.

pub mod atomic;
pub mod calibration;
pub mod conversions;
pub mod deadtime;
pub mod error;
pub mod hw_error;
pub mod linalg;
pub mod peakfit;
pub mod protocol;
pub mod rebin;
pub mod session;
pub mod settings;
pub mod spe;
pub mod station;
pub mod types;
pub mod util;

pub use calibration::{CalibrationPoint, EnergyCalibration};
pub use error::{McbError, Report, Result};
pub use peakfit::{FitOptions, PeakFit, RoiFit};
pub use protocol::McbClient;
pub use session::{
    AcquisitionSession, DisplayFrame, DisplayMode, MarkerInfo, SessionCommand, SessionOptions,
    Transition,
};
pub use settings::{FileStore, MemoryStore, SettingsStore};
pub use spe::SpeFile;
pub use station::Station;
pub use types::{GateMode, Presets, Roi, Timing};
