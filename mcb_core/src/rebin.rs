//! Power-of-two rebinning of a spectrum and the channel mappings between
//! raw (`N` channels) and rebinned (`M` channels) coordinates.
use crate::error::{McbError, Result, fail};
use crate::types::Roi;

/// Check that `m` is a usable display resolution for `n` raw channels.
pub fn check_resolution(n: usize, m: usize) -> Result<()> {
    if m == 0 || !m.is_power_of_two() || m > n || n % m != 0 {
        return fail(McbError::Validation(format!(
            "display channels {m} must be a power of two dividing the detector length {n}"
        )));
    }
    Ok(())
}

/// Sum adjacent bins down to `m` channels; the ROI mask reduces with "any".
pub fn rebin(counts: &[u32], mask: &[bool], m: usize) -> Result<(Vec<u64>, Vec<bool>)> {
    let n = counts.len();
    check_resolution(n, m)?;
    if mask.len() != n {
        return fail(McbError::Validation(format!(
            "ROI mask has {} channels, spectrum has {n}",
            mask.len()
        )));
    }
    let k = n / m;
    let binned = counts
        .chunks_exact(k)
        .map(|c| c.iter().map(|&v| u64::from(v)).sum())
        .collect();
    let binned_mask = mask.chunks_exact(k).map(|c| c.iter().any(|&b| b)).collect();
    Ok((binned, binned_mask))
}

/// Raw channel to rebinned channel (floor).
#[inline]
pub fn to_rebinned(raw: usize, n: usize, m: usize) -> usize {
    raw * m / n
}

/// Rebinned channel to the first raw channel it covers.
#[inline]
pub fn to_raw(r: usize, n: usize, m: usize) -> usize {
    r * n / m
}

/// Inclusive rebinned span `(start_r, end_r)` covered by `roi`.
pub fn roi_span(roi: Roi, n: usize, m: usize) -> (usize, usize) {
    (to_rebinned(roi.start, n, m), to_rebinned(roi.last(), n, m))
}
