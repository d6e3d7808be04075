use mcb_core::calibration::EnergyCalibration;
use mcb_core::peakfit::{self, FitOptions};
use mcb_core::rebin;
use mcb_core::types::Roi;
use rstest::rstest;

// xorshift32 uniform in (0, 1)
struct Rng(u32);

impl Rng {
    fn uniform(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        (f64::from(x) + 1.0) / (f64::from(u32::MAX) + 2.0)
    }

    // Poisson sample via the normal approximation (means here are >= 20)
    fn poisson(&mut self, mean: f64) -> u32 {
        let (u1, u2) = (self.uniform(), self.uniform());
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        (mean + z * mean.sqrt()).round().max(0.0) as u32
    }
}

fn noisy_spectrum(n: usize, truth: [f64; 5], seed: u32) -> Vec<u32> {
    let mut rng = Rng(seed);
    (0..n)
        .map(|c| rng.poisson(peakfit::model(&truth, c as f64).max(0.0)))
        .collect()
}

#[rstest]
#[case(0xC0FFEE)]
#[case(0xBADC0DE)]
#[case(12345)]
fn noisy_peak_is_recovered_within_five_percent(#[case] seed: u32) {
    let n = 2048;
    let truth = [2500.0, 614.0, 9.0, -0.005, 40.0];
    let counts = noisy_spectrum(n, truth, seed);
    let mask = vec![false; n];
    let (rebinned, _) = rebin::rebin(&counts, &mask, n).unwrap();

    let fit = peakfit::fit_roi(
        &rebinned,
        n,
        Roi::new(574, 80),
        &EnergyCalibration::default(),
        &FitOptions::default(),
    );
    let p = fit.channel.expect("fit converges");
    assert!((p.mean - truth[1]).abs() / truth[1] < 0.05, "mean {}", p.mean);
    assert!((p.sigma - truth[2]).abs() / truth[2] < 0.05, "sigma {}", p.sigma);
    assert!(
        (p.amplitude - truth[0]).abs() / truth[0] < 0.05,
        "amplitude {}",
        p.amplitude
    );
    assert!(p.errors.iter().all(|e| e.is_finite() && *e >= 0.0));
    assert_eq!(fit.curve.len(), 80);
}

#[test]
fn rebinned_fit_reports_raw_channel_units() {
    let n = 2048;
    let truth = [3000.0, 1024.0, 16.0, 0.0, 30.0];
    let counts = noisy_spectrum(n, truth, 777);
    let mask = vec![false; n];
    let (rebinned, _) = rebin::rebin(&counts, &mask, 512).unwrap();

    let fit = peakfit::fit_roi(
        &rebinned,
        n,
        Roi::new(944, 160),
        &EnergyCalibration::default(),
        &FitOptions::default(),
    );
    let p = fit.channel.expect("fit converges");
    // Each bin is plotted at its first raw channel, so the mean sits about
    // 1.5 channels below the true centre.
    assert!((p.mean - 1022.5).abs() < 3.0, "mean {}", p.mean);
    assert!((p.sigma - 16.0).abs() / 16.0 < 0.05, "sigma {}", p.sigma);
    // Curve x values are rebinned bin centres.
    assert_eq!(fit.curve.first().map(|c| c.0), Some(236.5));
}

#[test]
fn calibrated_energy_fit_tracks_channel_fit() {
    let n = 2048;
    let truth = [2000.0, 800.0, 10.0, 0.0, 25.0];
    let counts = noisy_spectrum(n, truth, 4242);
    let (rebinned, _) = rebin::rebin(&counts, &vec![false; n], n).unwrap();
    let cal = EnergyCalibration::from_coefficients(0.0, 0.5, 10.0, "keV");

    let fit = peakfit::fit_roi(&rebinned, n, Roi::new(760, 80), &cal, &FitOptions::default());
    let ch = fit.channel.expect("channel fit");
    let en = fit.energy.expect("energy fit");
    assert!((en.mean - cal.energy(ch.mean)).abs() < 0.5);
    assert!((en.sigma - 0.5 * ch.sigma).abs() < 0.2);
}
