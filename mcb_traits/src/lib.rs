//! Capability traits shared by every MCB backend.
//!
//! The core only talks to detectors through [`Transport`]; the simulated and
//! vendor-library backends in `mcb_hardware` both implement it.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Error type returned across the transport boundary.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned across the transport boundary.
pub type TransportResult<T> = Result<T, TransportError>;

/// Opaque identifier of one opened detector.
///
/// It owns no data; it is only a key for transport calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DetectorHandle(i32);

impl DetectorHandle {
    #[inline]
    pub fn new(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Byte-level access to a set of multichannel analyzers.
///
/// Detector indices are 1-based, as enumerated by the vendor configuration.
/// Every call is synchronous; implementations own any timeout handling.
pub trait Transport {
    /// Number of configured detectors.
    fn detector_count(&mut self) -> TransportResult<u32>;

    /// Configured `(name, id)` of the detector at `index`.
    fn detector_name(&mut self, index: u32) -> TransportResult<(String, u32)>;

    fn open(&mut self, index: u32) -> TransportResult<DetectorHandle>;

    fn close(&mut self, handle: DetectorHandle) -> TransportResult<()>;

    fn is_active(&mut self, handle: DetectorHandle) -> TransportResult<bool>;

    /// Send one ASCII command and return the single response line.
    fn comm(&mut self, handle: DetectorHandle, command: &str) -> TransportResult<String>;

    /// Read `count` channels starting at `start`: `(counts, roi_mask)`.
    fn read_counts(
        &mut self,
        handle: DetectorHandle,
        start: usize,
        count: usize,
    ) -> TransportResult<(Vec<u32>, Vec<bool>)>;

    fn channel_count(&mut self, handle: DetectorHandle) -> TransportResult<usize>;

    /// Acquisition start time in seconds since the Unix epoch.
    fn start_timestamp(&mut self, handle: DetectorHandle) -> TransportResult<i64>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn detector_count(&mut self) -> TransportResult<u32> {
        (**self).detector_count()
    }
    fn detector_name(&mut self, index: u32) -> TransportResult<(String, u32)> {
        (**self).detector_name(index)
    }
    fn open(&mut self, index: u32) -> TransportResult<DetectorHandle> {
        (**self).open(index)
    }
    fn close(&mut self, handle: DetectorHandle) -> TransportResult<()> {
        (**self).close(handle)
    }
    fn is_active(&mut self, handle: DetectorHandle) -> TransportResult<bool> {
        (**self).is_active(handle)
    }
    fn comm(&mut self, handle: DetectorHandle, command: &str) -> TransportResult<String> {
        (**self).comm(handle, command)
    }
    fn read_counts(
        &mut self,
        handle: DetectorHandle,
        start: usize,
        count: usize,
    ) -> TransportResult<(Vec<u32>, Vec<bool>)> {
        (**self).read_counts(handle, start, count)
    }
    fn channel_count(&mut self, handle: DetectorHandle) -> TransportResult<usize> {
        (**self).channel_count(handle)
    }
    fn start_timestamp(&mut self, handle: DetectorHandle) -> TransportResult<i64> {
        (**self).start_timestamp(handle)
    }
}
