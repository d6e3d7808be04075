//! Dead time over a sliding window of recent update intervals.
use std::collections::VecDeque;

use crate::types::Timing;

/// Number of update intervals averaged.
pub const WINDOW: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct DeadTimeWindow {
    last: Option<Timing>,
    deltas: VecDeque<(u64, u64)>,
}

impl DeadTimeWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new timing sample; a decrease in real time (CLEAR) restarts the window.
    pub fn push(&mut self, t: Timing) {
        if let Some(prev) = self.last
            && t.real_ms < prev.real_ms
        {
            self.deltas.clear();
            self.last = Some(t);
            return;
        }
        if let Some(prev) = self.last {
            let d_real = t.real_ms.saturating_sub(prev.real_ms);
            let d_live = t.live_ms.saturating_sub(prev.live_ms);
            if self.deltas.len() == WINDOW {
                self.deltas.pop_front();
            }
            self.deltas.push_back((d_real, d_live));
        }
        self.last = Some(t);
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.deltas.clear();
    }

    /// `(1 − Σlive / Σreal) · 100`, or 0 when no real time elapsed beyond live time.
    pub fn percent(&self) -> f64 {
        let (real, live) = self
            .deltas
            .iter()
            .fold((0u64, 0u64), |(r, l), &(dr, dl)| (r + dr, l + dl));
        if real <= live {
            return 0.0;
        }
        (1.0 - live as f64 / real as f64) * 100.0
    }
}
