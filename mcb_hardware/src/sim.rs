//! In-memory MCB used by tests and the CLI `sim` backend.
//!
//! Answers every command with the same fixed-width response records a real
//! MCB produces (`$C` counts, `$D` ROI, `$F` gate, `$E` errors), so the
//! protocol client exercises its positional parsing against it.
use std::time::{SystemTime, UNIX_EPOCH};

use mcb_traits::{DetectorHandle, Transport, TransportResult};
use tracing::{debug, trace};

use crate::error::HwError;

/// Duration of one device time tick in milliseconds.
const TICK_MS: u64 = 20;

/// Live time accrues at this fraction of real time while acquiring.
const LIVE_PERMILLE: u64 = 950;

const GATE_NAMES: [&str; 3] = ["OFF", "COINCIDENT", "ANTICOINCIDENT"];

#[derive(Debug, Clone)]
struct SimDetector {
    name: String,
    id: u32,
    open: bool,
    active: bool,
    counts: Vec<u32>,
    roi_mask: Vec<bool>,
    // fractional counts not yet emitted by the acquisition model
    pending: Vec<f64>,
    real_ticks: u64,
    live_ticks: u64,
    real_preset_ticks: u64,
    live_preset_ticks: u64,
    gate: usize,
    lld: usize,
    uld: usize,
    start_time: i64,
    roi_cursor: usize,
    fail_next: u32,
    // comm calls that still succeed before one injected failure
    fail_after: Option<u32>,
    garble_next: u32,
}

impl SimDetector {
    fn new(index: u32, channels: usize) -> Self {
        Self {
            name: format!("SIM MCB {index}"),
            id: 1000 + index,
            open: false,
            active: false,
            counts: vec![0; channels],
            roi_mask: vec![false; channels],
            pending: vec![0.0; channels],
            real_ticks: 0,
            live_ticks: 0,
            real_preset_ticks: 0,
            live_preset_ticks: 0,
            gate: 0,
            lld: 0,
            uld: channels.saturating_sub(1),
            start_time: unix_now(),
            roi_cursor: 0,
            fail_next: 0,
            fail_after: None,
            garble_next: 0,
        }
    }

    fn channels(&self) -> usize {
        self.counts.len()
    }

    /// Accumulate `ms` of acquisition: timers, synthetic peaks, preset stop.
    fn advance(&mut self, ms: u64, rate_per_s: f64) {
        if !self.active {
            return;
        }
        let ticks = ms / TICK_MS;
        if ticks == 0 {
            return;
        }
        self.real_ticks += ticks;
        self.live_ticks += ticks * LIVE_PERMILLE / 1000;

        let n = self.channels() as f64;
        let peaks = [(0.30 * n, n / 200.0, 1.0), (0.62 * n, n / 150.0, 0.6)];
        let seconds = (ticks * TICK_MS) as f64 / 1000.0;
        let hi = self.uld.min(self.channels().saturating_sub(1));
        for ch in self.lld..=hi {
            let x = ch as f64;
            let mut density = 0.002;
            for (mu, sigma, weight) in peaks {
                density += weight * (-(x - mu).powi(2) / (2.0 * sigma * sigma)).exp();
            }
            self.pending[ch] += rate_per_s * seconds * density;
            let whole = self.pending[ch].floor();
            if whole >= 1.0 {
                self.counts[ch] = self.counts[ch].saturating_add(whole as u32);
                self.pending[ch] -= whole;
            }
        }

        let real_done = self.real_preset_ticks > 0 && self.real_ticks >= self.real_preset_ticks;
        let live_done = self.live_preset_ticks > 0 && self.live_ticks >= self.live_preset_ticks;
        if real_done || live_done {
            debug!(detector = self.id, real_done, live_done, "sim preset reached");
            self.active = false;
        }
    }

    fn next_roi_from(&self, from: usize) -> Option<(usize, usize)> {
        let n = self.channels();
        let start = (from..n).find(|&c| self.roi_mask[c])?;
        let len = self.roi_mask[start..].iter().take_while(|&&m| m).count();
        Some((start, len))
    }

    fn execute(&mut self, command: &str) -> String {
        let command = command.trim();
        let (verb, args) = match command.split_once(' ') {
            Some((v, a)) => (v, a.trim()),
            None => (command, ""),
        };
        match verb {
            "START" => {
                if self.active {
                    return error_record(0, 1);
                }
                self.active = true;
                self.start_time = unix_now();
                ack_record()
            }
            "STOP" => {
                if !self.active {
                    return error_record(0, 1);
                }
                self.active = false;
                ack_record()
            }
            "CLEAR" => {
                self.counts.iter_mut().for_each(|c| *c = 0);
                self.pending.iter_mut().for_each(|p| *p = 0.0);
                self.real_ticks = 0;
                self.live_ticks = 0;
                ack_record()
            }
            "SHOW_TRUE" => count_record(self.real_ticks),
            "SHOW_LIVE" => count_record(self.live_ticks),
            "SHOW_TRUE_PRESET" => count_record(self.real_preset_ticks),
            "SHOW_LIVE_PRESET" => count_record(self.live_preset_ticks),
            "SHOW_LLD" => count_record(self.lld as u64),
            "SHOW_ULD" => count_record(self.uld as u64),
            "SHOW_GATE" => gate_record(self.gate),
            "SET_TRUE" => self.set_u64(args, |d, v| d.real_ticks = v),
            "SET_LIVE" => self.set_u64(args, |d, v| d.live_ticks = v),
            "SET_TRUE_PRESET" => self.set_u64(args, |d, v| d.real_preset_ticks = v),
            "SET_LIVE_PRESET" => self.set_u64(args, |d, v| d.live_preset_ticks = v),
            "SET_LLD" | "SET_ULD" => match args.parse::<usize>() {
                Ok(v) if v < self.channels() => {
                    if verb == "SET_LLD" {
                        self.lld = v;
                    } else {
                        self.uld = v;
                    }
                    ack_record()
                }
                _ => error_record(129, 128),
            },
            "SET_GATE_OFF" => self.set_gate(0),
            "SET_GATE_COINCIDENT" => self.set_gate(1),
            "SET_GATE_ANTICOINCIDENT" => self.set_gate(2),
            "SET_DATA" => self.set_data(args),
            "SET_ROI" | "CLEAR_ROI" => match parse_pair(args) {
                Some((start, len)) if len > 0 && start + len <= self.channels() => {
                    let mark = verb == "SET_ROI";
                    self.roi_mask[start..start + len]
                        .iter_mut()
                        .for_each(|m| *m = mark);
                    ack_record()
                }
                _ => error_record(129, 128),
            },
            "SHOW_ROI" => {
                self.roi_cursor = 0;
                self.show_roi()
            }
            "SHOW_NEXT" => self.show_roi(),
            _ => error_record(132, 0),
        }
    }

    fn set_u64(&mut self, args: &str, apply: impl FnOnce(&mut Self, u64)) -> String {
        match args.parse::<u64>() {
            Ok(v) => {
                apply(self, v);
                ack_record()
            }
            Err(_) => error_record(129, 128),
        }
    }

    fn set_gate(&mut self, index: usize) -> String {
        self.gate = index;
        ack_record()
    }

    // SET_DATA value | SET_DATA [start,count],value
    fn set_data(&mut self, args: &str) -> String {
        let (range, value) = match args.strip_prefix('[') {
            Some(rest) => match rest.split_once(']') {
                Some((range, value)) => (parse_pair(range), value.trim_start_matches(',')),
                None => return error_record(129, 128),
            },
            None => (Some((0, self.channels())), args),
        };
        let Ok(value) = value.trim().parse::<u32>() else {
            return error_record(129, 129);
        };
        match range {
            Some((start, count)) if count > 0 && start + count <= self.channels() => {
                self.counts[start..start + count]
                    .iter_mut()
                    .for_each(|c| *c = value);
                ack_record()
            }
            _ => error_record(129, 128),
        }
    }

    fn show_roi(&mut self) -> String {
        match self.next_roi_from(self.roi_cursor) {
            Some((start, len)) => {
                self.roi_cursor = start + len;
                roi_record(start, len)
            }
            None => {
                self.roi_cursor = self.channels();
                roi_record(0, 0)
            }
        }
    }
}

/// Deterministic in-memory stand-in for a bank of MCBs.
#[derive(Debug, Clone)]
pub struct SimulatedMcb {
    detectors: Vec<SimDetector>,
    auto_advance_ms: u64,
    rate_per_s: f64,
}

impl Default for SimulatedMcb {
    fn default() -> Self {
        Self::new(1, 2048)
    }
}

impl SimulatedMcb {
    /// `count` detectors with `channels` channels each.
    pub fn new(count: u32, channels: usize) -> Self {
        Self {
            detectors: (1..=count).map(|i| SimDetector::new(i, channels)).collect(),
            auto_advance_ms: 0,
            rate_per_s: 400.0,
        }
    }

    /// Advance acquiring detectors by `ms` on every `is_active` poll.
    pub fn with_auto_advance(mut self, ms: u64) -> Self {
        self.auto_advance_ms = ms;
        self
    }

    /// Peak count rate used by the acquisition model.
    pub fn with_rate(mut self, counts_per_s: f64) -> Self {
        self.rate_per_s = counts_per_s.max(0.0);
        self
    }

    /// Advance one detector by `ms` of acquisition time.
    pub fn advance(&mut self, index: u32, ms: u64) {
        let rate = self.rate_per_s;
        if let Some(d) = self.detector_mut(index) {
            d.advance(ms, rate);
        }
    }

    /// Make the next `n` comm calls on detector `index` fail at the transport level.
    pub fn fail_next_comm(&mut self, index: u32, n: u32) {
        if let Some(d) = self.detector_mut(index) {
            d.fail_next = n;
        }
    }

    /// Let `k` more comm calls on detector `index` succeed, then fail one.
    pub fn fail_comm_after(&mut self, index: u32, k: u32) {
        if let Some(d) = self.detector_mut(index) {
            d.fail_after = Some(k);
        }
    }

    /// Make the next `n` comm calls on detector `index` answer with a garbled record.
    pub fn garble_next_comm(&mut self, index: u32, n: u32) {
        if let Some(d) = self.detector_mut(index) {
            d.garble_next = n;
        }
    }

    /// Raw counts of detector `index`, bypassing the protocol.
    pub fn counts(&self, index: u32) -> Option<&[u32]> {
        self.detectors
            .get(index.checked_sub(1)? as usize)
            .map(|d| d.counts.as_slice())
    }

    fn detector_mut(&mut self, index: u32) -> Option<&mut SimDetector> {
        self.detectors.get_mut(index.checked_sub(1)? as usize)
    }

    fn by_handle(&mut self, handle: DetectorHandle) -> Result<&mut SimDetector, HwError> {
        let raw = handle.raw();
        let idx = usize::try_from(raw)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .ok_or(HwError::InvalidHandle(raw))?;
        match self.detectors.get_mut(idx) {
            Some(d) if d.open => Ok(d),
            _ => Err(HwError::InvalidHandle(raw)),
        }
    }
}

impl Transport for SimulatedMcb {
    fn detector_count(&mut self) -> TransportResult<u32> {
        Ok(self.detectors.len() as u32)
    }

    fn detector_name(&mut self, index: u32) -> TransportResult<(String, u32)> {
        let d = self
            .detector_mut(index)
            .ok_or(HwError::NoSuchDetector(index))?;
        Ok((d.name.clone(), d.id))
    }

    fn open(&mut self, index: u32) -> TransportResult<DetectorHandle> {
        let d = self
            .detector_mut(index)
            .ok_or(HwError::NoSuchDetector(index))?;
        d.open = true;
        Ok(DetectorHandle::new(index as i32))
    }

    fn close(&mut self, handle: DetectorHandle) -> TransportResult<()> {
        self.by_handle(handle)?.open = false;
        Ok(())
    }

    fn is_active(&mut self, handle: DetectorHandle) -> TransportResult<bool> {
        let (ms, rate) = (self.auto_advance_ms, self.rate_per_s);
        let d = self.by_handle(handle)?;
        if ms > 0 {
            d.advance(ms, rate);
        }
        Ok(d.active)
    }

    fn comm(&mut self, handle: DetectorHandle, command: &str) -> TransportResult<String> {
        let d = self.by_handle(handle)?;
        if d.fail_next > 0 {
            d.fail_next -= 1;
            return Err(Box::new(HwError::driver("comm", -3)));
        }
        match d.fail_after {
            Some(0) => {
                d.fail_after = None;
                return Err(Box::new(HwError::driver("comm", -3)));
            }
            Some(k) => d.fail_after = Some(k - 1),
            None => {}
        }
        if d.garble_next > 0 {
            d.garble_next -= 1;
            return Ok("$C12x4?\n".to_string());
        }
        let resp = d.execute(command);
        trace!(handle = %handle, command, response = resp.trim_end(), "sim comm");
        Ok(resp)
    }

    fn read_counts(
        &mut self,
        handle: DetectorHandle,
        start: usize,
        count: usize,
    ) -> TransportResult<(Vec<u32>, Vec<bool>)> {
        let d = self.by_handle(handle)?;
        let len = d.channels();
        let end = start.saturating_add(count);
        if end > len {
            return Err(Box::new(HwError::ChannelRange { start, end, len }));
        }
        Ok((d.counts[start..end].to_vec(), d.roi_mask[start..end].to_vec()))
    }

    fn channel_count(&mut self, handle: DetectorHandle) -> TransportResult<usize> {
        Ok(self.by_handle(handle)?.channels())
    }

    fn start_timestamp(&mut self, handle: DetectorHandle) -> TransportResult<i64> {
        Ok(self.by_handle(handle)?.start_time)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn parse_pair(s: &str) -> Option<(usize, usize)> {
    let (a, b) = s.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Sum of the record bytes modulo 256, as three decimal digits.
fn checksum(body: &str) -> String {
    let sum = body.bytes().fold(0u32, |acc, b| acc + u32::from(b)) % 256;
    format!("{sum:03}")
}

fn with_checksum(body: String) -> String {
    let sum = checksum(&body);
    format!("{body}{sum}\n")
}

fn ack_record() -> String {
    with_checksum("$A".to_string())
}

fn error_record(macro_code: u16, micro_code: u16) -> String {
    with_checksum(format!("$E{macro_code:03}{micro_code:03}"))
}

fn count_record(value: u64) -> String {
    with_checksum(format!("$C{value:>10}"))
}

fn roi_record(start: usize, len: usize) -> String {
    with_checksum(format!("$D{start:>10}{len:>10}"))
}

fn gate_record(index: usize) -> String {
    let name = GATE_NAMES.get(index).copied().unwrap_or("OFF");
    format!("$F{index}{name}\n")
}
