//! Butterfly checks on a single smile.
//!
//! A smile admits butterfly arbitrage where the density it implies through
//! Breeden-Litzenberger, `q(K) = ∂²C/∂K²`, turns negative.
//!
//! # References
//! - Breeden, D.T. & Litzenberger, R.H. "Prices of State-Contingent Claims
//!   Implicit in Option Prices" (1978)

use serde::{Deserialize, Serialize};

use crate::error;
use crate::pricing::norm_cdf;
use crate::smile::SmileSection;
use crate::validate::validate_positive;

/// Outcome of a butterfly scan over one smile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageReport {
    /// No negative density was found on the scanned strikes.
    pub is_free: bool,
    /// Scanned strikes where the density is negative, ascending in strike.
    pub butterfly_violations: Vec<ButterflyViolation>,
}

impl ArbitrageReport {
    /// Report with nothing found.
    pub fn clean() -> Self {
        Self::from_violations(Vec::new())
    }

    /// Report built from a scan; free exactly when nothing was found.
    pub fn from_violations(butterfly_violations: Vec<ButterflyViolation>) -> Self {
        Self {
            is_free: butterfly_violations.is_empty(),
            butterfly_violations,
        }
    }

    /// Most negative density found, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use volprob::smile::{ArbitrageReport, ButterflyViolation};
    ///
    /// let report = ArbitrageReport::from_violations(vec![
    ///     ButterflyViolation::new(80.0, -0.001),
    ///     ButterflyViolation::new(90.0, -0.005),
    /// ]);
    /// assert_eq!(report.worst_violation().unwrap().strike, 90.0);
    /// ```
    pub fn worst_violation(&self) -> Option<&ButterflyViolation> {
        self.butterfly_violations
            .iter()
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
    }
}

/// Negative density at one strike.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ButterflyViolation {
    pub strike: f64,
    /// Density at `strike` (negative).
    pub density: f64,
    /// `|density|`.
    pub magnitude: f64,
}

impl ButterflyViolation {
    pub fn new(strike: f64, density: f64) -> Self {
        Self {
            strike,
            density,
            magnitude: density.abs(),
        }
    }
}

/// Scan `n` evenly spaced log-moneyness points of `[k_min, k_max]`.
///
/// `negative(k)` flags a point; flagged points whose density can be
/// evaluated become violations. Points where the density fails to evaluate
/// are skipped.
pub(crate) fn scan<S, P>(
    smile: &S,
    k_min: f64,
    k_max: f64,
    n: usize,
    negative: P,
) -> ArbitrageReport
where
    S: SmileSection + ?Sized,
    P: Fn(f64) -> bool,
{
    let forward = smile.forward();
    let step = (k_max - k_min) / (n.max(2) - 1) as f64;
    let violations = (0..n)
        .map(|i| k_min + step * i as f64)
        .filter(|&k| negative(k))
        .filter_map(|k| {
            let strike = forward * k.exp();
            smile
                .density(strike)
                .ok()
                .map(|d| ButterflyViolation::new(strike, d))
        })
        .collect();
    ArbitrageReport::from_violations(violations)
}

/// Undiscounted Black call on total variance `w`.
pub(crate) fn undiscounted_call(forward: f64, strike: f64, w: f64) -> f64 {
    if w <= 0.0 {
        return (forward - strike).max(0.0);
    }
    let sd = w.sqrt();
    let d1 = (forward / strike).ln() / sd + 0.5 * sd;
    forward * norm_cdf(d1) - strike * norm_cdf(d1 - sd)
}

/// `∂²C/∂K²` by central differences of the undiscounted call implied by
/// `smile`, step `1e-4 · K`.
pub(crate) fn numeric_density<S>(smile: &S, strike: f64) -> error::Result<f64>
where
    S: SmileSection + ?Sized,
{
    validate_positive(strike, "strike")?;
    let h = strike * 1e-4;
    let f = smile.forward();
    let call = |k: f64| -> error::Result<f64> { Ok(undiscounted_call(f, k, smile.variance(k)?.0)) };
    Ok((call(strike + h)? - 2.0 * call(strike)? + call(strike - h)?) / (h * h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smile::SviSmile;
    use approx::assert_abs_diff_eq;

    fn flat() -> SviSmile {
        // w(k) = 0.04 everywhere: 20% vol over one year.
        SviSmile::new(100.0, 1.0, 0.04, 0.0, 0.0, 0.0, 0.1).unwrap()
    }

    #[test]
    fn clean_report_has_no_worst() {
        let r = ArbitrageReport::clean();
        assert!(r.is_free);
        assert!(r.worst_violation().is_none());
        assert_eq!(r, ArbitrageReport::from_violations(Vec::new()));
    }

    #[test]
    fn worst_violation_picks_largest_magnitude() {
        let r = ArbitrageReport::from_violations(vec![
            ButterflyViolation::new(80.0, -0.001),
            ButterflyViolation::new(85.0, -0.010),
            ButterflyViolation::new(90.0, -0.005),
        ]);
        assert!(!r.is_free);
        let worst = r.worst_violation().unwrap();
        assert_eq!(worst.strike, 85.0);
        assert_eq!(worst.magnitude, 0.010);
    }

    #[test]
    fn undiscounted_call_limits() {
        assert_eq!(undiscounted_call(100.0, 90.0, 0.0), 10.0);
        assert_eq!(undiscounted_call(100.0, 110.0, 0.0), 0.0);
        // ATM: F·(2N(sd/2) − 1)
        let c = undiscounted_call(100.0, 100.0, 0.04);
        assert_abs_diff_eq!(c, 100.0 * (2.0 * norm_cdf(0.1) - 1.0), epsilon = 1e-12);
    }

    #[test]
    fn numeric_density_of_flat_smile_is_lognormal() {
        let smile = flat();
        let (f, sd) = (100.0_f64, 0.2_f64);
        for k in [70.0_f64, 100.0, 140.0] {
            let z = ((k / f).ln() + 0.5 * sd * sd) / sd;
            let expected = (-0.5 * z * z).exp() / (k * sd * (2.0 * std::f64::consts::PI).sqrt());
            let q = numeric_density(&smile, k).unwrap();
            assert!((q - expected).abs() < 1e-6, "{q} vs {expected}");
        }
    }

    #[test]
    fn scan_reports_only_flagged_points() {
        let smile = flat();
        assert!(scan(&smile, -1.0, 1.0, 21, |_| false).is_free);

        let r = scan(&smile, -1.0, 1.0, 21, |k| k > 0.55);
        assert_eq!(r.butterfly_violations.len(), 5);
        assert!(r.butterfly_violations.windows(2).all(|w| w[0].strike < w[1].strike));
        let first = r.butterfly_violations[0].strike;
        assert_abs_diff_eq!(first, 100.0 * 0.6_f64.exp(), epsilon = 1e-9);
    }
}
