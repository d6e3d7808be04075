//! Reader and writer for the line-oriented `.Spe` spectrum format.
//!
//! A file is a sequence of `$NAME:` section headers, each followed by its
//! value lines. Sections are written in a fixed order and read by name;
//! unknown sections are skipped.
use std::fmt::Write as _;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::atomic::write_atomic;
use crate::calibration::{DEFAULT_UNITS, EnergyCalibration};
use crate::error::{McbError, Result, fail};
use crate::types::{Presets, Roi};
use crate::util::{MILLIS_PER_SEC, ms_to_whole_secs};

/// Written in place of an empty description.
pub const NO_DESCRIPTION: &str = "No sample description was entered.";
/// Application tag written to `$SPEC_REM`.
pub const APPLICATION: &str = "Pystro";
pub const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresetKind {
    #[default]
    None,
    Live,
    Real,
}

impl PresetKind {
    fn label(self) -> &'static str {
        match self {
            PresetKind::None => "None",
            PresetKind::Live => "Live Time",
            PresetKind::Real => "Real Time",
        }
    }

    fn from_label(s: &str) -> Option<Self> {
        [PresetKind::None, PresetKind::Live, PresetKind::Real]
            .into_iter()
            .find(|k| k.label().eq_ignore_ascii_case(s))
    }
}

/// `$PRESETS` content: the controlling preset and both magnitudes in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpePresets {
    pub kind: PresetKind,
    pub primary_s: u64,
    pub secondary_s: u64,
}

impl SpePresets {
    /// The smaller nonzero preset controls; equal presets count as real time.
    pub fn from_presets(p: Presets) -> Self {
        let live_s = ms_to_whole_secs(p.live_ms);
        let real_s = ms_to_whole_secs(p.real_ms);
        if p.live_ms == 0 && p.real_ms == 0 {
            return Self::default();
        }
        if p.live_ms != 0 && (p.real_ms == 0 || p.live_ms < p.real_ms) {
            Self {
                kind: PresetKind::Live,
                primary_s: live_s,
                secondary_s: real_s,
            }
        } else {
            Self {
                kind: PresetKind::Real,
                primary_s: real_s,
                secondary_s: live_s,
            }
        }
    }

    pub fn to_presets(self) -> Presets {
        let (p, s) = (self.primary_s * MILLIS_PER_SEC, self.secondary_s * MILLIS_PER_SEC);
        match self.kind {
            PresetKind::None => Presets::default(),
            PresetKind::Live => Presets {
                live_ms: p,
                real_ms: s,
            },
            PresetKind::Real => Presets {
                real_ms: p,
                live_ms: s,
            },
        }
    }
}

/// Everything a `.Spe` file carries.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeFile {
    pub description: String,
    pub detector_id: u32,
    pub detector_name: String,
    pub measured: Option<NaiveDateTime>,
    pub live_s: u64,
    pub real_s: u64,
    pub first_channel: usize,
    pub counts: Vec<u32>,
    pub rois: Vec<Roi>,
    pub presets: SpePresets,
    pub calibration: EnergyCalibration,
}

impl Default for SpeFile {
    fn default() -> Self {
        Self {
            description: String::new(),
            detector_id: 0,
            detector_name: String::new(),
            measured: None,
            live_s: 0,
            real_s: 0,
            first_channel: 0,
            counts: Vec::new(),
            rois: Vec::new(),
            presets: SpePresets::default(),
            calibration: EnergyCalibration::default(),
        }
    }
}

fn format_err<T>(msg: impl Into<String>) -> Result<T> {
    fail(McbError::Format(msg.into()))
}

impl SpeFile {
    /// Last channel index covered by `counts`.
    pub fn last_channel(&self) -> usize {
        (self.first_channel + self.counts.len()).saturating_sub(1)
    }

    /// Check the file fits a detector with `channels` channels.
    pub fn validate_for(&self, channels: usize) -> Result<()> {
        if self.first_channel != 0 || self.counts.len() != channels {
            return fail(McbError::Validation(format!(
                "file covers channels {}..={}, detector has {channels}",
                self.first_channel,
                self.last_channel()
            )));
        }
        if let Some(r) = self.rois.iter().find(|r| !r.fits(channels)) {
            return fail(McbError::Validation(format!(
                "ROI {}..={} outside detector channels 0..{channels}",
                r.start,
                r.last()
            )));
        }
        Ok(())
    }

    pub fn to_spe_string(&self) -> String {
        let mut s = String::with_capacity(self.counts.len() * 9 + 512);
        let description = if self.description.trim().is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            let d = self.description.replace(['\r', '\n'], " ");
            // Headers start in column 0; the reader trims the indent again.
            if d.starts_with('$') {
                format!(" {d}")
            } else {
                d
            }
        };
        let measured = self.measured.unwrap_or_default();
        let cal = &self.calibration;
        // Writing to a String cannot fail.
        let _ = writeln!(s, "$SPEC_ID:\n{description}");
        let _ = writeln!(
            s,
            "$SPEC_REM:\nDET# {}\nDETDESC# {}\nAP# {APPLICATION}",
            self.detector_id, self.detector_name
        );
        let _ = writeln!(s, "$DATE_MEA:\n{}", measured.format(DATE_FORMAT));
        let _ = writeln!(s, "$MEAS_TIM:\n{} {}", self.live_s, self.real_s);
        let _ = writeln!(s, "$DATA:\n{} {}", self.first_channel, self.last_channel());
        for c in &self.counts {
            let _ = writeln!(s, "{c:>8}");
        }
        let _ = writeln!(s, "$ROI:\n{}", self.rois.len());
        for r in &self.rois {
            let _ = writeln!(s, "{} {}", r.start, r.last());
        }
        let _ = writeln!(
            s,
            "$PRESETS:\n{}\n{}\n{}",
            self.presets.kind.label(),
            self.presets.primary_s,
            self.presets.secondary_s
        );
        let _ = writeln!(s, "$ENER_FIT:\n{:.5E} {:.5E}", cal.c, cal.b);
        let _ = writeln!(
            s,
            "$MCA_CAL:\n3\n{:.5E} {:.5E} {:.5E} {}",
            cal.c, cal.b, cal.a, cal.units
        );
        let _ = writeln!(s, "$SHAPE_CAL:\n3\n0 0 0");
        s
    }

    /// Write atomically to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_spe_string().as_bytes())
            .map_err(|e| eyre::Report::new(McbError::Io(format!("write {}: {e}", path.display()))))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| eyre::Report::new(McbError::Io(format!("read {}: {e}", path.display()))))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let sections = split_sections(text)?;
        let find = |name: &str| {
            sections
                .iter()
                .rev()
                .find(|(n, _)| *n == name)
                .map(|(_, lines)| lines.as_slice())
        };
        let mut file = SpeFile::default();

        if let Some(lines) = find("SPEC_ID") {
            let d = lines.first().map_or("", |l| l.trim());
            if d != NO_DESCRIPTION {
                file.description = d.to_string();
            }
        }
        if let Some(lines) = find("SPEC_REM") {
            for l in lines {
                let l = l.trim();
                if let Some(v) = l.strip_prefix("DET#") {
                    file.detector_id = parse_num(v.trim(), "SPEC_REM detector id")?;
                } else if let Some(v) = l.strip_prefix("DETDESC#") {
                    file.detector_name = v.trim().to_string();
                }
            }
        }
        if let Some(lines) = find("DATE_MEA") {
            let d = lines.first().map_or("", |l| l.trim());
            let t = NaiveDateTime::parse_from_str(d, DATE_FORMAT);
            match t {
                Ok(t) => file.measured = Some(t),
                Err(e) => return format_err(format!("DATE_MEA {d:?}: {e}")),
            }
        }
        if let Some(lines) = find("MEAS_TIM") {
            let tokens = tokens(lines);
            if tokens.len() != 2 {
                return format_err("MEAS_TIM must hold live and real time");
            }
            file.live_s = parse_seconds(tokens[0], "MEAS_TIM live")?;
            file.real_s = parse_seconds(tokens[1], "MEAS_TIM real")?;
        }

        let Some(data) = find("DATA") else {
            return format_err("missing $DATA section");
        };
        let Some((header, values)) = data.split_first() else {
            return format_err("empty $DATA section");
        };
        let bounds: Vec<&str> = header.split_whitespace().collect();
        let [first, last] = bounds.as_slice() else {
            return format_err("DATA header must be '<first> <last>'");
        };
        let first: usize = parse_num(first, "DATA first channel")?;
        let last: usize = parse_num(last, "DATA last channel")?;
        let Some(expected) = last.checked_sub(first).and_then(|d| d.checked_add(1)) else {
            return format_err(format!("DATA range {first}..{last} is empty"));
        };
        let counts = tokens(values)
            .into_iter()
            .map(|t| parse_num::<u32>(t, "DATA count"))
            .collect::<Result<Vec<_>>>()?;
        if counts.len() != expected {
            return format_err(format!(
                "DATA declares {expected} channels but holds {}",
                counts.len()
            ));
        }
        file.first_channel = first;
        file.counts = counts;

        if let Some(lines) = find("ROI") {
            let toks = tokens(lines);
            let Some((n, rest)) = toks.split_first() else {
                return format_err("empty $ROI section");
            };
            let n: usize = parse_num(n, "ROI count")?;
            if rest.len() != n.saturating_mul(2) {
                return format_err(format!("ROI declares {n} regions but holds {} bounds", rest.len()));
            }
            for pair in rest.chunks_exact(2) {
                let a: usize = parse_num(pair[0], "ROI first channel")?;
                let b: usize = parse_num(pair[1], "ROI last channel")?;
                if b < a {
                    return format_err(format!("ROI {a}..{b} ends before it starts"));
                }
                file.rois.push(Roi::new(a, b - a + 1));
            }
        }

        if let Some(lines) = find("PRESETS") {
            let lines: Vec<&str> = lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
            let Some(kind) = lines.first().and_then(|l| PresetKind::from_label(l)) else {
                return format_err("PRESETS type must be 'Live Time', 'Real Time' or 'None'");
            };
            let value = |i: usize| match lines.get(i) {
                Some(v) => parse_seconds(v, "PRESETS value"),
                None => Ok(0),
            };
            file.presets = SpePresets {
                kind,
                primary_s: value(1)?,
                secondary_s: value(2)?,
            };
        }

        if let Some(lines) = find("MCA_CAL") {
            let toks = tokens(lines);
            let Some((n, rest)) = toks.split_first() else {
                return format_err("empty $MCA_CAL section");
            };
            let n: usize = parse_num(n, "MCA_CAL coefficient count")?;
            if !(1..=3).contains(&n) || rest.len() < n {
                return format_err(format!("MCA_CAL declares {n} coefficients"));
            }
            let mut coeffs = [0.0f64; 3];
            for (i, t) in rest[..n].iter().enumerate() {
                coeffs[i] = parse_float(t, "MCA_CAL coefficient")?;
            }
            let units = rest.get(n).copied().unwrap_or(DEFAULT_UNITS);
            file.calibration =
                EnergyCalibration::from_coefficients(coeffs[2], coeffs[1], coeffs[0], units);
        } else if let Some(lines) = find("ENER_FIT") {
            let toks = tokens(lines);
            if toks.len() < 2 {
                return format_err("ENER_FIT must hold offset and slope");
            }
            let c = parse_float(toks[0], "ENER_FIT offset")?;
            let b = parse_float(toks[1], "ENER_FIT slope")?;
            file.calibration = EnergyCalibration::from_coefficients(0.0, b, c, DEFAULT_UNITS);
        }

        Ok(file)
    }
}

type Section<'a> = (&'a str, Vec<&'a str>);

fn split_sections(text: &str) -> Result<Vec<Section<'_>>> {
    let mut out: Vec<Section<'_>> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_end();
        if let Some(name) = trimmed.strip_prefix('$') {
            let Some(name) = name.strip_suffix(':') else {
                return format_err(format!("section header {trimmed:?} must end with ':'"));
            };
            out.push((name, Vec::new()));
        } else if let Some((_, lines)) = out.last_mut() {
            lines.push(line);
        } else if !trimmed.is_empty() {
            return format_err("content before the first section header");
        }
    }
    Ok(out)
}

fn tokens<'a>(lines: &[&'a str]) -> Vec<&'a str> {
    lines.iter().flat_map(|l| l.split_whitespace()).collect()
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    s.trim()
        .parse::<T>()
        .or_else(|_| format_err(format!("{what}: {s:?} is not a valid number")))
}

fn parse_float(s: &str, what: &str) -> Result<f64> {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => format_err(format!("{what}: {s:?} is not a finite number")),
    }
}

/// Seconds, truncated to whole seconds; fractional values are accepted.
fn parse_seconds(s: &str, what: &str) -> Result<u64> {
    let v = parse_float(s, what)?;
    if v < 0.0 || v > u64::MAX as f64 {
        return format_err(format!("{what}: {s:?} is out of range"));
    }
    Ok(v.floor() as u64)
}
