use mcb_core::calibration::{CalibrationPoint, EnergyCalibration};
use proptest::prelude::*;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * b.abs().max(1.0)
}

proptest! {
    // Three distinct valid points are reproduced exactly by the quadratic.
    #[test]
    fn three_points_are_reproduced(
        c1 in 1.0f64..700.0,
        gap1 in 5.0f64..700.0,
        gap2 in 5.0f64..700.0,
        a in -1e-4f64..1e-4,
        b in 0.2f64..3.0,
        c in 0.0f64..50.0,
    ) {
        let chans = [c1, c1 + gap1, c1 + gap1 + gap2];
        let pts = chans.map(|ch| CalibrationPoint::new(ch, (a * ch + b) * ch + c));
        prop_assume!(pts.iter().all(CalibrationPoint::is_valid));
        let cal = EnergyCalibration::from_points(&pts, "keV");
        prop_assert!(cal.calibrated);
        for p in &pts {
            prop_assert!(close(cal.energy(p.channel), p.energy), "{} vs {}", cal.energy(p.channel), p.energy);
        }
    }

    // Two points give a line through both.
    #[test]
    fn two_points_give_a_line(
        c1 in 1.0f64..2000.0,
        gap in 1.0f64..2000.0,
        e1 in 1.0f64..3000.0,
        e2 in 1.0f64..3000.0,
    ) {
        let pts = [CalibrationPoint::new(c1, e1), CalibrationPoint::new(c1 + gap, e2)];
        let cal = EnergyCalibration::from_points(&pts, "keV");
        prop_assert!(cal.calibrated);
        prop_assert_eq!(cal.a, 0.0);
        prop_assert!(close(cal.energy(c1), e1));
        prop_assert!(close(cal.energy(c1 + gap), e2));
    }

    // Points with a non-positive coordinate never take part.
    #[test]
    fn invalid_points_are_ignored(ch in 1.0f64..4000.0, e in 1.0f64..4000.0, bad in -100.0f64..=0.0) {
        let with_bad = [
            CalibrationPoint::new(ch, e),
            CalibrationPoint::new(bad, 10.0),
            CalibrationPoint::new(10.0, bad),
        ];
        let alone = EnergyCalibration::from_points(&[CalibrationPoint::new(ch, e)], "keV");
        prop_assert_eq!(EnergyCalibration::from_points(&with_bad, "keV"), alone);
    }
}

#[test]
fn zero_valid_points_is_uncalibrated() {
    let cal = EnergyCalibration::from_points(&[CalibrationPoint::default(); 3], "MeV");
    assert!(!cal.calibrated);
    assert_eq!(cal.units, "MeV");
}

#[test]
fn one_point_is_proportional() {
    let cal = EnergyCalibration::from_points(&[CalibrationPoint::new(662.0, 661.7)], "keV");
    assert!(cal.calibrated);
    assert_eq!(cal.c, 0.0);
    assert!(close(cal.energy(1324.0), 1323.4));
}

#[test]
fn duplicate_channels_are_uncalibrated() {
    let cal = EnergyCalibration::from_points(
        &[CalibrationPoint::new(100.0, 50.0), CalibrationPoint::new(100.0, 80.0)],
        "keV",
    );
    assert!(!cal.calibrated);
}
