//! Gaussian-plus-linear-background fit of the counts inside each ROI.
//!
//! Model: `f(x) = A·exp(−(x−μ)²/(2σ²)) + m·x + b`, fitted by weighted
//! Levenberg-Marquardt with `σᵢ = √max(countᵢ, 1)`. Parameter errors come from
//! the unscaled covariance `(JᵀWJ)⁻¹`. A fit that does not converge, produces
//! non-finite values or has a singular covariance yields `None`.
use crate::calibration::EnergyCalibration;
use crate::linalg;
use crate::rebin;
use crate::types::Roi;

/// Fewer points than free parameters cannot constrain the model.
pub const MIN_POINTS: usize = 5;

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e12;
const LAMBDA_MIN: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Relative chi-square decrease below which the fit is converged.
    pub tolerance: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

/// Fitted parameters and their standard errors, in the same order:
/// amplitude, mean, sigma, slope, intercept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakFit {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
    pub slope: f64,
    pub intercept: f64,
    pub errors: [f64; 5],
}

impl PeakFit {
    pub fn eval(&self, x: f64) -> f64 {
        model(
            &[self.amplitude, self.mean, self.sigma, self.slope, self.intercept],
            x,
        )
    }

    /// Full width at half maximum.
    pub fn fwhm(&self) -> f64 {
        2.0 * (2.0 * std::f64::consts::LN_2).sqrt() * self.sigma
    }
}

#[inline]
pub fn model(p: &[f64; 5], x: f64) -> f64 {
    let d = x - p[1];
    p[0] * (-(d * d) / (2.0 * p[2] * p[2])).exp() + p[3] * x + p[4]
}

fn chi_square(p: &[f64; 5], x: &[f64], y: &[f64], w: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .zip(w)
        .map(|((&xi, &yi), &wi)| {
            let r = yi - model(p, xi);
            wi * r * r
        })
        .sum()
}

/// `(JᵀWJ, JᵀWr)` at `p`.
fn normal_equations(p: &[f64; 5], x: &[f64], y: &[f64], w: &[f64]) -> ([[f64; 5]; 5], [f64; 5]) {
    let mut jtj = [[0.0; 5]; 5];
    let mut jtr = [0.0; 5];
    let (a, mu, s) = (p[0], p[1], p[2]);
    for ((&xi, &yi), &wi) in x.iter().zip(y).zip(w) {
        let d = xi - mu;
        let g = (-(d * d) / (2.0 * s * s)).exp();
        let j = [g, a * g * d / (s * s), a * g * d * d / (s * s * s), xi, 1.0];
        let r = yi - model(p, xi);
        for row in 0..5 {
            jtr[row] += wi * j[row] * r;
            for col in 0..5 {
                jtj[row][col] += wi * j[row] * j[col];
            }
        }
    }
    (jtj, jtr)
}

/// Fit the model to `(x, y)` starting from `guess`.
pub fn fit_peak(x: &[f64], y: &[f64], guess: [f64; 5], opts: &FitOptions) -> Option<PeakFit> {
    let n = x.len();
    if n < MIN_POINTS || y.len() != n || guess.iter().any(|v| !v.is_finite()) {
        return None;
    }
    // Fit in centered coordinates; b absorbs the shift of the background line.
    let xc = x.iter().sum::<f64>() / n as f64;
    let u: Vec<f64> = x.iter().map(|v| v - xc).collect();
    let w: Vec<f64> = y.iter().map(|v| 1.0 / v.max(1.0)).collect();
    let mut p = [guess[0], guess[1] - xc, guess[2], guess[3], guess[4] + guess[3] * xc];

    let mut chi2 = chi_square(&p, &u, y, &w);
    if !chi2.is_finite() {
        return None;
    }
    let mut lambda = LAMBDA_START;
    let mut converged = false;
    for _ in 0..opts.max_iterations {
        let (jtj, jtr) = normal_equations(&p, &u, y, &w);
        let mut accepted = None;
        while lambda < LAMBDA_MAX {
            let mut damped = jtj;
            for (i, row) in damped.iter_mut().enumerate() {
                row[i] += lambda * jtj[i][i].max(1e-9);
            }
            if let Some(delta) = linalg::solve(damped, jtr) {
                let mut trial = p;
                for (t, d) in trial.iter_mut().zip(delta) {
                    *t += d;
                }
                let c = chi_square(&trial, &u, y, &w);
                if c.is_finite() && c <= chi2 {
                    accepted = Some((trial, c));
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);
                    break;
                }
            }
            lambda *= 10.0;
        }
        let Some((next, c)) = accepted else {
            // No damping finds a descent direction: p is a minimum.
            converged = true;
            break;
        };
        let decrease = chi2 - c;
        p = next;
        chi2 = c;
        if decrease <= opts.tolerance * chi2.max(f64::MIN_POSITIVE) {
            converged = true;
            break;
        }
    }
    if !converged {
        tracing::debug!(points = n, "peak fit did not converge");
        return None;
    }

    let (jtj, _) = normal_equations(&p, &u, y, &w);
    let cov = linalg::invert(jtj)?;
    let var_b = cov[4][4] + xc * xc * cov[3][3] - 2.0 * xc * cov[3][4];
    let vars = [cov[0][0], cov[1][1], cov[2][2], cov[3][3], var_b];
    if vars.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return None;
    }
    let fit = PeakFit {
        amplitude: p[0],
        mean: p[1] + xc,
        sigma: p[2].abs(),
        slope: p[3],
        intercept: p[4] - p[3] * xc,
        errors: vars.map(f64::sqrt),
    };
    let finite = [fit.amplitude, fit.mean, fit.sigma, fit.slope, fit.intercept]
        .iter()
        .all(|v| v.is_finite());
    (finite && fit.sigma > 0.0).then_some(fit)
}

/// Starting point: ROI-midpoint count, midpoint coordinate, half the ROI width.
pub fn initial_guess(y: &[f64], lo: f64, hi: f64) -> [f64; 5] {
    let amplitude = y.get(y.len() / 2).copied().unwrap_or(0.0);
    [amplitude, (lo + hi) / 2.0, (hi - lo).abs() / 2.0, 0.0, 0.0]
}

/// Fit results and the curve to draw for one ROI.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiFit {
    pub roi: Roi,
    /// Fit with x in raw channel units.
    pub channel: Option<PeakFit>,
    /// Fit with x in calibrated energy units.
    pub energy: Option<PeakFit>,
    /// `(rebinned x at bin centre, y)`; the fitted model or the counts on failure.
    pub curve: Vec<(f64, f64)>,
}

/// Fit `roi` on a spectrum rebinned from `n` to `rebinned.len()` channels.
pub fn fit_roi(
    rebinned: &[u64],
    n: usize,
    roi: Roi,
    calibration: &EnergyCalibration,
    opts: &FitOptions,
) -> RoiFit {
    let m = rebinned.len();
    if m == 0 || n == 0 || roi.len == 0 || roi.start >= n {
        return RoiFit {
            roi,
            channel: None,
            energy: None,
            curve: Vec::new(),
        };
    }
    let (start_r, end_r) = rebin::roi_span(roi, n, m);
    let end_r = end_r.min(m - 1);
    let width = (n / m) as f64;
    let bins: Vec<usize> = (start_r..=end_r).collect();
    let x: Vec<f64> = bins.iter().map(|&r| rebin::to_raw(r, n, m) as f64).collect();
    let y: Vec<f64> = bins.iter().map(|&r| rebinned[r] as f64).collect();
    let lo = x.first().copied().unwrap_or(0.0);
    let hi = x.last().copied().unwrap_or(0.0) + width;

    let channel = fit_peak(&x, &y, initial_guess(&y, lo, hi), opts);
    let energy = if calibration.calibrated {
        let xe: Vec<f64> = x.iter().map(|&v| calibration.energy(v)).collect();
        let guess = initial_guess(&y, calibration.energy(lo), calibration.energy(hi));
        fit_peak(&xe, &y, guess, opts)
    } else {
        None
    };
    if channel.is_none() {
        tracing::debug!(start = roi.start, len = roi.len, "ROI fit failed, drawing counts");
    }

    let curve = bins
        .iter()
        .zip(x.iter().zip(&y))
        .map(|(&r, (&xi, &yi))| {
            let v = channel.map_or(yi, |f| f.eval(xi));
            (r as f64 + 0.5, v)
        })
        .collect();
    RoiFit {
        roi,
        channel,
        energy,
        curve,
    }
}
