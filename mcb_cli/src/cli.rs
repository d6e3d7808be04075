//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "mcb", version, about = "Multichannel buffer acquisition CLI")]
pub struct Cli {
    /// Path to config TOML (typed); built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print results and logs as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// `CHANNEL:ENERGY` calibration reference.
pub fn parse_point(s: &str) -> Result<(f64, f64), String> {
    let (c, e) = s
        .split_once(':')
        .ok_or_else(|| format!("expected CHANNEL:ENERGY, got {s:?}"))?;
    let c: f64 = c.trim().parse().map_err(|_| format!("bad channel {c:?}"))?;
    let e: f64 = e.trim().parse().map_err(|_| format!("bad energy {e:?}"))?;
    Ok((c, e))
}

/// `START:LEN` region in raw channels.
pub fn parse_roi(s: &str) -> Result<(usize, usize), String> {
    let (a, b) = s
        .split_once(':')
        .ok_or_else(|| format!("expected START:LEN, got {s:?}"))?;
    let a: usize = a.trim().parse().map_err(|_| format!("bad ROI start {a:?}"))?;
    let b: usize = b.trim().parse().map_err(|_| format!("bad ROI length {b:?}"))?;
    Ok((a, b))
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured detectors
    List,
    /// Show acquisition state of one detector
    Status {
        /// 1-based detector index
        #[arg(long, default_value_t = 1)]
        detector: u32,
    },
    /// Acquire and print timing, dead time and ROI fits every poll
    Monitor {
        #[arg(long, default_value_t = 1)]
        detector: u32,
        /// Number of polls before stopping; runs until Ctrl-C or a preset when 0
        #[arg(long, default_value_t = 10)]
        ticks: u64,
        /// Clear spectrum and times before starting
        #[arg(long, action = ArgAction::SetTrue)]
        clear: bool,
        /// Live-time preset in seconds
        #[arg(long = "live-preset-s", value_name = "S")]
        live_preset_s: Option<u64>,
        /// Real-time preset in seconds
        #[arg(long = "real-preset-s", value_name = "S")]
        real_preset_s: Option<u64>,
        /// Region of interest to mark before starting (repeatable)
        #[arg(long = "roi", value_name = "START:LEN", value_parser = parse_roi)]
        rois: Vec<(usize, usize)>,
        /// Save the spectrum here once stopped
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
    },
    /// Compute and persist an energy calibration
    Calibrate {
        #[arg(long, default_value_t = 1)]
        detector: u32,
        /// Reference point (repeatable, at most 3)
        #[arg(long = "point", value_name = "CHANNEL:ENERGY", value_parser = parse_point, conflicts_with = "csv")]
        points: Vec<(f64, f64)>,
        /// Calibration points CSV (strict header `channel,energy`)
        #[arg(long, value_name = "FILE")]
        csv: Option<PathBuf>,
        /// Energy units label
        #[arg(long)]
        units: Option<String>,
    },
    /// Summarize a spectrum file and fit its ROIs offline
    Inspect {
        file: PathBuf,
        /// Rebin to this many channels before fitting
        #[arg(long = "display-channels", value_name = "M")]
        display_channels: Option<usize>,
    },
    /// Validate a spectrum file and write it to a detector
    Load {
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        detector: u32,
    },
    /// Quick health check (open every detector, read its length)
    SelfCheck,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_and_roi_parsers() {
        assert_eq!(parse_point("662:661.7"), Ok((662.0, 661.7)));
        assert!(parse_point("662").is_err());
        assert_eq!(parse_roi("100:20"), Ok((100, 20)));
        assert!(parse_roi("100:-1").is_err());
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
