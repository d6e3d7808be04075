//! Tick/time helpers for the device boundary.

/// Duration of one device time tick in milliseconds.
pub const TICK_MS: u64 = 20;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Device ticks to milliseconds (exact).
#[inline]
pub fn ticks_to_ms(ticks: u64) -> u64 {
    ticks.saturating_mul(TICK_MS)
}

/// Milliseconds to device ticks, truncating partial ticks.
#[inline]
pub fn ms_to_ticks(ms: u64) -> u64 {
    ms / TICK_MS
}

/// Whole seconds in `ms`, truncating.
#[inline]
pub fn ms_to_whole_secs(ms: u64) -> u64 {
    ms / MILLIS_PER_SEC
}
