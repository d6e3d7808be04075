//! Maps `Box<dyn Error>` from the transport boundary to typed `McbError`.
//!
//! `mcb_traits::Transport` returns `Box<dyn Error + Send + Sync>`; this module
//! converts those to our typed enum, with an optional feature-gated path for
//! `mcb_hardware::HwError` downcasting.

use crate::error::McbError;

/// Map a trait-boundary error to a typed `McbError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> McbError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<mcb_hardware::HwError>() {
            return match hw {
                mcb_hardware::HwError::Timeout => McbError::Timeout,
                mcb_hardware::HwError::ChannelRange { .. } => McbError::Validation(hw.to_string()),
                other => McbError::Transport(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        McbError::Timeout
    } else {
        McbError::Transport(s)
    }
}

/// Convert a boxed transport error into an `eyre::Report` carrying `McbError`.
pub fn to_report(e: mcb_traits::TransportError) -> eyre::Report {
    eyre::Report::new(map_hw_error(e.as_ref()))
}
