//! `From` implementations bridging `mcb_config` types to `mcb_core` types.

use crate::calibration::{CalibrationPoint, EnergyCalibration};
use crate::peakfit::FitOptions;
use crate::session::{DisplayMode, SessionOptions};

// ── Calibration points ───────────────────────────────────────────────────────

impl From<&mcb_config::CalibrationPointRow> for CalibrationPoint {
    fn from(r: &mcb_config::CalibrationPointRow) -> Self {
        Self {
            channel: r.channel,
            energy: r.energy,
        }
    }
}

impl From<CalibrationPoint> for mcb_config::CalibrationPointRow {
    fn from(p: CalibrationPoint) -> Self {
        Self {
            channel: p.channel,
            energy: p.energy,
        }
    }
}

// ── Persisted calibration ────────────────────────────────────────────────────

/// Points take precedence; stored coefficients apply when no point is valid.
impl From<&mcb_config::DetectorSettings> for EnergyCalibration {
    fn from(s: &mcb_config::DetectorSettings) -> Self {
        let points: Vec<CalibrationPoint> = s.points.iter().map(CalibrationPoint::from).collect();
        if points.iter().any(CalibrationPoint::is_valid) {
            EnergyCalibration::from_points(&points, &s.units)
        } else {
            EnergyCalibration::from_coefficients(s.a, s.b, s.c, &s.units)
        }
    }
}

// ── Fit / display ────────────────────────────────────────────────────────────

impl From<&mcb_config::FitCfg> for FitOptions {
    fn from(c: &mcb_config::FitCfg) -> Self {
        Self {
            max_iterations: c.max_iterations,
            tolerance: c.tolerance,
        }
    }
}

impl From<mcb_config::DisplayMode> for DisplayMode {
    fn from(m: mcb_config::DisplayMode) -> Self {
        match m {
            mcb_config::DisplayMode::Linear => DisplayMode::Linear,
            mcb_config::DisplayMode::Log => DisplayMode::Log,
        }
    }
}

impl From<&mcb_config::Config> for SessionOptions {
    fn from(c: &mcb_config::Config) -> Self {
        Self {
            display_channels: c.acquisition.display_channels,
            display_mode: c.acquisition.display_mode.into(),
            fit: (&c.fit).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_without_points_use_coefficients() {
        let s = mcb_config::DetectorSettings {
            b: 0.5,
            c: 1.0,
            ..mcb_config::DetectorSettings::default()
        };
        let cal = EnergyCalibration::from(&s);
        assert!(cal.calibrated);
        assert_eq!(cal.energy(10.0), 6.0);
    }

    #[test]
    fn valid_points_override_coefficients() {
        let mut s = mcb_config::DetectorSettings {
            b: 99.0,
            ..mcb_config::DetectorSettings::default()
        };
        s.points[0] = mcb_config::CalibrationPointRow {
            channel: 100.0,
            energy: 200.0,
        };
        let cal = EnergyCalibration::from(&s);
        assert!((cal.b - 2.0).abs() < 1e-12);
    }
}
