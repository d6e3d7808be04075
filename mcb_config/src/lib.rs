#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, the persisted settings file and calibration-point parsing.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `SettingsFile` holds per-detector calibration and description, keyed by
//!   detector identity.
//! - The calibration-points CSV loader enforces exact headers.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Largest number of calibration points a detector keeps.
pub const MAX_CALIBRATION_POINTS: usize = 3;

/// Calibration-points CSV schema.
///
/// Expected headers:
/// channel,energy
///
/// Example:
/// channel,energy
/// 661,661.7
/// 1173,1173.2
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
pub struct CalibrationPointRow {
    pub channel: f64,
    pub energy: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Linear,
    Log,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Acquisition {
    /// Tick period of the poll loop (ms).
    pub poll_ms: u64,
    /// Display resolution; absent means the full detector length.
    pub display_channels: Option<usize>,
    pub display_mode: DisplayMode,
}

impl Default for Acquisition {
    fn default() -> Self {
        Self {
            poll_ms: 200,
            display_channels: None,
            display_mode: DisplayMode::Linear,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct FitCfg {
    /// Levenberg-Marquardt iteration cap per ROI fit.
    pub max_iterations: usize,
    /// Relative chi-square change treated as converged.
    pub tolerance: f64,
}

impl Default for FitCfg {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sim,
    Live,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Hardware {
    pub backend: Backend,
    /// Number of detectors the simulated backend exposes.
    pub sim_detectors: u32,
    /// Channel count of every simulated detector.
    pub sim_channels: usize,
    /// Simulated acquisition time added per activity poll (ms, 0 freezes time).
    pub sim_advance_ms: u64,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            backend: Backend::Sim,
            sim_detectors: 1,
            sim_channels: 2048,
            sim_advance_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Settings file holding per-detector calibration and description.
    pub path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            path: "mcb_settings.toml".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub acquisition: Acquisition,
    pub fit: FitCfg,
    pub hardware: Hardware,
    pub settings: Settings,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Acquisition
        if self.acquisition.poll_ms == 0 {
            eyre::bail!("acquisition.poll_ms must be >= 1");
        }
        if self.acquisition.poll_ms > 60 * 1000 {
            eyre::bail!("acquisition.poll_ms is unreasonably large (>60s)");
        }
        if let Some(m) = self.acquisition.display_channels
            && !m.is_power_of_two()
        {
            eyre::bail!("acquisition.display_channels must be a power of two, got {m}");
        }

        // Fit
        if self.fit.max_iterations == 0 {
            eyre::bail!("fit.max_iterations must be >= 1");
        }
        if !(self.fit.tolerance.is_finite() && self.fit.tolerance > 0.0) {
            eyre::bail!("fit.tolerance must be > 0");
        }

        // Hardware
        if self.hardware.sim_detectors == 0 {
            eyre::bail!("hardware.sim_detectors must be >= 1");
        }
        if !self.hardware.sim_channels.is_power_of_two() || self.hardware.sim_channels < 2 {
            eyre::bail!(
                "hardware.sim_channels must be a power of two >= 2, got {}",
                self.hardware.sim_channels
            );
        }
        if let Some(m) = self.acquisition.display_channels
            && self.hardware.backend == Backend::Sim
            && m > self.hardware.sim_channels
        {
            eyre::bail!("acquisition.display_channels must be <= hardware.sim_channels");
        }

        // Settings
        if self.settings.path.trim().is_empty() {
            eyre::bail!("settings.path must not be empty");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly, got {r}");
        }

        Ok(())
    }
}

/// Persisted state of one detector.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorSettings {
    /// Exactly three slots; unused slots hold zeros.
    pub points: Vec<CalibrationPointRow>,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub units: String,
    pub description: String,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            points: vec![CalibrationPointRow::default(); MAX_CALIBRATION_POINTS],
            a: 0.0,
            b: 0.0,
            c: 0.0,
            units: "keV".to_string(),
            description: String::new(),
        }
    }
}

/// On-disk settings keyed by detector identity (`"{id:04} {name}"`).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SettingsFile {
    pub detectors: BTreeMap<String, DetectorSettings>,
}

impl SettingsFile {
    pub fn from_toml(s: &str) -> eyre::Result<Self> {
        let file: Self =
            toml::from_str(s).map_err(|e| eyre::eyre!("parse settings file: {e}"))?;
        for (key, det) in &file.detectors {
            if det.points.len() > MAX_CALIBRATION_POINTS {
                eyre::bail!(
                    "settings for {key:?} hold {} calibration points, at most {MAX_CALIBRATION_POINTS} allowed",
                    det.points.len()
                );
            }
        }
        Ok(file)
    }

    pub fn to_toml(&self) -> eyre::Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre::eyre!("serialize settings file: {e}"))
    }
}

pub fn load_calibration_points_csv(
    path: &std::path::Path,
) -> eyre::Result<Vec<CalibrationPointRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["channel", "energy"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers 'channel,energy', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationPointRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.len() > MAX_CALIBRATION_POINTS {
        eyre::bail!(
            "calibration CSV holds {} points, at most {MAX_CALIBRATION_POINTS} allowed",
            rows.len()
        );
    }
    Ok(rows)
}
