//! Typed commands and queries and their wire strings.
use crate::protocol::schema::{self, ResponseSchema};
use crate::types::GateMode;

/// A command that changes device state and is answered with an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Clear,
    SetData { start: usize, count: usize, value: u32 },
    SetRealTicks(u64),
    SetLiveTicks(u64),
    SetRealPresetTicks(u64),
    SetLivePresetTicks(u64),
    SetGate(GateMode),
    SetLld(usize),
    SetUld(usize),
    SetRoi { start: usize, len: usize },
    ClearRoi { start: usize, len: usize },
}

impl Command {
    pub fn wire(&self) -> String {
        match self {
            Command::Start => "START".into(),
            Command::Stop => "STOP".into(),
            Command::Clear => "CLEAR".into(),
            Command::SetData { start, count, value } => {
                format!("SET_DATA [{start},{count}],{value}")
            }
            Command::SetRealTicks(t) => format!("SET_TRUE {t}"),
            Command::SetLiveTicks(t) => format!("SET_LIVE {t}"),
            Command::SetRealPresetTicks(t) => format!("SET_TRUE_PRESET {t}"),
            Command::SetLivePresetTicks(t) => format!("SET_LIVE_PRESET {t}"),
            Command::SetGate(g) => format!("SET_GATE_{}", g.wire_name()),
            Command::SetLld(n) => format!("SET_LLD {n}"),
            Command::SetUld(n) => format!("SET_ULD {n}"),
            Command::SetRoi { start, len } => format!("SET_ROI {start},{len}"),
            Command::ClearRoi { start, len } => format!("CLEAR_ROI {start},{len}"),
        }
    }
}

/// A read-only request answered by a typed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    RealTicks,
    LiveTicks,
    RealPresetTicks,
    LivePresetTicks,
    Gate,
    Lld,
    Uld,
    FirstRoi,
    NextRoi,
}

impl Query {
    pub fn wire(self) -> &'static str {
        match self {
            Query::RealTicks => "SHOW_TRUE",
            Query::LiveTicks => "SHOW_LIVE",
            Query::RealPresetTicks => "SHOW_TRUE_PRESET",
            Query::LivePresetTicks => "SHOW_LIVE_PRESET",
            Query::Gate => "SHOW_GATE",
            Query::Lld => "SHOW_LLD",
            Query::Uld => "SHOW_ULD",
            Query::FirstRoi => "SHOW_ROI",
            Query::NextRoi => "SHOW_NEXT",
        }
    }

    pub fn schema(self) -> ResponseSchema {
        match self {
            Query::Gate => schema::GATE,
            Query::FirstRoi | Query::NextRoi => schema::ROI,
            _ => schema::COUNT,
        }
    }
}
