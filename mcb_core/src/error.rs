use thiserror::Error;

use crate::protocol::codes::{macro_message, micro_message};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum McbError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timeout waiting for detector")]
    Timeout,
    #[error(
        "device rejected {command}: {} / {} (macro {macro_code}, micro {micro_code})",
        macro_message(*macro_code),
        micro_message(*macro_code, *micro_code)
    )]
    Device {
        command: String,
        macro_code: u16,
        micro_code: u16,
    },
    #[error("malformed response to {command}: {reason} (got {response:?})")]
    Protocol {
        command: String,
        response: String,
        reason: String,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("malformed spectrum file: {0}")]
    Format(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

impl McbError {
    /// Transport, timeout and device-reported failures: the call may succeed if retried.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McbError::Transport(_) | McbError::Timeout | McbError::Device { .. }
        )
    }

    pub(crate) fn protocol(command: &str, response: &str, reason: impl Into<String>) -> Self {
        McbError::Protocol {
            command: command.to_string(),
            response: response.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for McbError {
    fn from(e: std::io::Error) -> Self {
        McbError::Io(e.to_string())
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Shorthand for `Err(Report::new(e))`.
pub(crate) fn fail<T>(e: McbError) -> Result<T> {
    Err(eyre::Report::new(e))
}
