#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Detector backends implementing [`mcb_traits::Transport`].
pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", windows))]
pub mod mcbcio;

pub use error::{HwError, driver_error_message};
pub use sim::SimulatedMcb;

#[cfg(all(feature = "hardware", windows))]
pub use mcbcio::McbcioTransport;
