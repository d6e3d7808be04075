//! Plain value types shared across the core.

/// Contiguous region of interest in raw channel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    pub start: usize,
    pub len: usize,
}

impl Roi {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// Last channel covered (inclusive). Meaningless for an empty ROI.
    pub fn last(&self) -> usize {
        (self.start + self.len).saturating_sub(1)
    }

    pub fn contains(&self, channel: usize) -> bool {
        channel >= self.start && channel < self.start + self.len
    }

    /// True when the ROI lies inside `0..channels` and is non-empty.
    pub fn fits(&self, channels: usize) -> bool {
        self.len > 0 && self.start.checked_add(self.len).is_some_and(|e| e <= channels)
    }
}

/// Real and live acquisition time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timing {
    pub real_ms: u64,
    pub live_ms: u64,
}

/// Preset limits in milliseconds; 0 means no preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presets {
    pub real_ms: u64,
    pub live_ms: u64,
}

/// Coincidence gate of the MCB input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateMode {
    #[default]
    Off,
    Coincident,
    Anticoincident,
}

impl GateMode {
    pub const ALL: [GateMode; 3] = [GateMode::Off, GateMode::Coincident, GateMode::Anticoincident];

    pub fn index(self) -> u8 {
        match self {
            GateMode::Off => 0,
            GateMode::Coincident => 1,
            GateMode::Anticoincident => 2,
        }
    }

    pub fn from_index(i: u8) -> Option<Self> {
        Self::ALL.get(usize::from(i)).copied()
    }

    /// Name used on the wire (`SET_GATE_<name>`, `$F` records).
    pub fn wire_name(self) -> &'static str {
        match self {
            GateMode::Off => "OFF",
            GateMode::Coincident => "COINCIDENT",
            GateMode::Anticoincident => "ANTICOINCIDENT",
        }
    }

    pub fn from_wire_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.wire_name() == s)
    }
}

impl std::fmt::Display for GateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GateMode::Off => "off",
            GateMode::Coincident => "coincident",
            GateMode::Anticoincident => "anticoincident",
        })
    }
}

impl std::str::FromStr for GateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(GateMode::Off),
            "coincident" => Ok(GateMode::Coincident),
            "anticoincident" => Ok(GateMode::Anticoincident),
            other => Err(format!("unknown gate mode {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_index_and_wire_name_agree() {
        for g in GateMode::ALL {
            assert_eq!(GateMode::from_index(g.index()), Some(g));
            assert_eq!(GateMode::from_wire_name(g.wire_name()), Some(g));
        }
        assert_eq!(GateMode::from_index(3), None);
    }

    #[test]
    fn roi_bounds() {
        let r = Roi::new(10, 5);
        assert!(r.contains(10) && r.contains(14) && !r.contains(15));
        assert_eq!(r.last(), 14);
        assert!(r.fits(15));
        assert!(!r.fits(14));
        assert!(!Roi::new(0, 0).fits(10));
    }
}
