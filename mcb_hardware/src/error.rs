use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("{call} failed: {message} (driver code {code})")]
    Driver {
        call: &'static str,
        code: i32,
        message: &'static str,
    },
    #[error("detector communication timeout")]
    Timeout,
    #[error("invalid detector handle {0}")]
    InvalidHandle(i32),
    #[error("no detector at index {0}")]
    NoSuchDetector(u32),
    #[error("channels {start}..{end} outside detector length {len}")]
    ChannelRange { start: usize, end: usize, len: usize },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl HwError {
    /// Build a driver error from a vendor return code.
    pub fn driver(call: &'static str, code: i32) -> Self {
        if code == -2 {
            return HwError::Timeout;
        }
        HwError::Driver {
            call,
            code,
            message: driver_error_message(code),
        }
    }
}

/// Description of a vendor driver status code (as returned by the last-error query).
pub fn driver_error_message(code: i32) -> &'static str {
    match code {
        0 => "no error (maybe an MCB warning)",
        1 => "detector handle or other parameter is invalid",
        2 => "MCB reported error",
        3 => "disk, network or MCB I/O error",
        -1 => "detector communication broken, close the detector",
        -2 => "detector communication timeout, try again",
        -3 => "detector communication error, try again",
        -4 => "too many open detectors, close a detector and try again",
        -5 => "disk, OS or other error",
        4 => "memory allocation error",
        5 => "authorization or password failure",
        8 => "call before driver startup or after cleanup",
        9 => "connection not open",
        10 => "unexpected internal error",
        11 => "operation not supported by this MCB",
        _ => "unknown driver error",
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
