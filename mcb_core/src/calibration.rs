//! Channel to energy calibration from up to three reference points.
//!
//! The mapping is `energy = a·chan² + b·chan + c`. Zero valid points leave the
//! detector uncalibrated, one point fits a proportional line, two points a
//! line and three points the exact quadratic through them. Configurations
//! that cannot be solved (duplicate channels, non-finite results) also leave
//! the detector uncalibrated rather than failing.
use crate::linalg;

pub const DEFAULT_UNITS: &str = "keV";

/// One (channel, energy) reference pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationPoint {
    pub channel: f64,
    pub energy: f64,
}

impl CalibrationPoint {
    pub fn new(channel: f64, energy: f64) -> Self {
        Self { channel, energy }
    }

    /// Only points with positive channel and energy take part in the fit.
    pub fn is_valid(&self) -> bool {
        self.channel > 0.0 && self.energy > 0.0 && self.channel.is_finite() && self.energy.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnergyCalibration {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub calibrated: bool,
    pub units: String,
}

impl Default for EnergyCalibration {
    fn default() -> Self {
        Self::uncalibrated(DEFAULT_UNITS)
    }
}

impl EnergyCalibration {
    pub fn uncalibrated(units: &str) -> Self {
        Self {
            a: 0.0,
            b: 0.0,
            c: 0.0,
            calibrated: false,
            units: units.to_string(),
        }
    }

    /// Calibration with known coefficients; all-zero coefficients are uncalibrated.
    pub fn from_coefficients(a: f64, b: f64, c: f64, units: &str) -> Self {
        let finite = a.is_finite() && b.is_finite() && c.is_finite();
        if !finite || (a == 0.0 && b == 0.0 && c == 0.0) {
            return Self::uncalibrated(units);
        }
        Self {
            a,
            b,
            c,
            calibrated: true,
            units: units.to_string(),
        }
    }

    /// Fit from reference points; invalid points are ignored.
    pub fn from_points(points: &[CalibrationPoint], units: &str) -> Self {
        let valid: Vec<CalibrationPoint> = points.iter().copied().filter(|p| p.is_valid()).collect();
        let coeffs = match valid.as_slice() {
            [] => None,
            [p] => Some((0.0, p.energy / p.channel, 0.0)),
            [p, q] => {
                let dx = q.channel - p.channel;
                if dx == 0.0 {
                    None
                } else {
                    let b = (q.energy - p.energy) / dx;
                    Some((0.0, b, p.energy - b * p.channel))
                }
            }
            [p, q, r, ..] => {
                let row = |pt: &CalibrationPoint| [pt.channel * pt.channel, pt.channel, 1.0];
                linalg::solve([row(p), row(q), row(r)], [p.energy, q.energy, r.energy])
                    .map(|x| (x[0], x[1], x[2]))
            }
        };
        match coeffs {
            Some((a, b, c)) if a.is_finite() && b.is_finite() && c.is_finite() => Self {
                a,
                b,
                c,
                calibrated: true,
                units: units.to_string(),
            },
            _ => {
                if !valid.is_empty() {
                    tracing::debug!(points = valid.len(), "calibration points are degenerate");
                }
                Self::uncalibrated(units)
            }
        }
    }

    /// Energy at `channel` (meaningless unless `calibrated`).
    #[inline]
    pub fn energy(&self, channel: f64) -> f64 {
        (self.a * channel + self.b) * channel + self.c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    #[test]
    fn no_valid_points_is_uncalibrated() {
        let cal = EnergyCalibration::from_points(
            &[CalibrationPoint::new(0.0, 100.0), CalibrationPoint::new(10.0, -1.0)],
            "keV",
        );
        assert!(!cal.calibrated);
        assert_eq!((cal.a, cal.b, cal.c), (0.0, 0.0, 0.0));
    }

    #[test]
    fn single_point_is_proportional() {
        let cal = EnergyCalibration::from_points(&[CalibrationPoint::new(662.0, 661.7)], "keV");
        assert!(cal.calibrated);
        assert!(close(cal.energy(662.0), 661.7));
        assert!(close(cal.energy(0.0), 0.0));
    }

    #[test]
    fn two_points_define_a_line() {
        let cal = EnergyCalibration::from_points(
            &[CalibrationPoint::new(100.0, 150.0), CalibrationPoint::new(300.0, 550.0)],
            "keV",
        );
        assert!(close(cal.b, 2.0));
        assert!(close(cal.c, -50.0));
        assert_eq!(cal.a, 0.0);
    }

    #[test]
    fn duplicate_channels_degrade_to_uncalibrated() {
        let cal = EnergyCalibration::from_points(
            &[CalibrationPoint::new(100.0, 150.0), CalibrationPoint::new(100.0, 550.0)],
            "keV",
        );
        assert!(!cal.calibrated);
        let cal = EnergyCalibration::from_points(
            &[
                CalibrationPoint::new(100.0, 1.0),
                CalibrationPoint::new(100.0, 2.0),
                CalibrationPoint::new(300.0, 3.0),
            ],
            "MeV",
        );
        assert!(!cal.calibrated);
        assert_eq!(cal.units, "MeV");
    }

    #[test]
    fn zero_coefficients_are_uncalibrated() {
        assert!(!EnergyCalibration::from_coefficients(0.0, 0.0, 0.0, "keV").calibrated);
        assert!(EnergyCalibration::from_coefficients(0.0, 0.5, 0.0, "keV").calibrated);
    }
}
