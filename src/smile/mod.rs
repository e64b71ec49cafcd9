//! Single-expiry volatility smile models and their calibration.
//!
//! A smile maps log-moneyness `k = ln(K/F)` to total implied variance
//! `w(k) = σ²T` at a fixed expiry. All models implement [`SmileSection`].
//!
//! ## Models
//!
//! - [`SviSmile`] — raw SVI parameterization (Gatheral), 5 parameters
//! - [`SplineSmile`] — penalized B-spline on total variance, non-parametric
//!
//! [`SmileCalibrator`] turns quotes or implied-vol points into a
//! [`FittedVolCurve`] holding one of them.

pub mod arbitrage;
pub mod calibrator;
pub mod spline;
pub mod svi;

pub use arbitrage::{ArbitrageReport, ButterflyViolation};
pub use calibrator::{CalibrationDiagnostics, FittedVolCurve, ImpliedVolPoint, SmileCalibrator};
pub use spline::SplineSmile;
pub use svi::SviSmile;

use serde::{Deserialize, Serialize};

use crate::error::{self, VolProbError};
use crate::types::{Variance, Vol};
use crate::validate::validate_positive;

/// A single-expiry volatility smile.
///
/// # Thread Safety
/// All implementations must be `Send + Sync` so surfaces can be fitted
/// and queried across threads.
///
/// # Error Handling
/// Methods return `Result` so implementations can report numerical failures
/// (negative variance, NaN) rather than panicking.
pub trait SmileSection: Send + Sync {
    /// Total implied variance `w(k)` at log-moneyness `k`.
    fn total_variance(&self, k: f64) -> error::Result<Variance>;

    /// Forward price F at this expiry.
    fn forward(&self) -> f64;

    /// Time to expiry T in years.
    fn expiry(&self) -> f64;

    /// Implied Black volatility σ at the given strike.
    fn vol(&self, strike: f64) -> error::Result<Vol> {
        validate_positive(strike, "strike")?;
        let k = (strike / self.forward()).ln();
        let w = self.total_variance(k)?.0;
        if w < 0.0 || !w.is_finite() {
            return Err(VolProbError::NumericalError {
                message: format!("total variance {w} at strike {strike} (k = {k})"),
            });
        }
        Ok(Vol((w / self.expiry()).sqrt()))
    }

    /// Total Black variance σ²T at the given strike.
    fn variance(&self, strike: f64) -> error::Result<Variance> {
        let v = self.vol(strike)?;
        Ok(Variance(v.0 * v.0 * self.expiry()))
    }

    /// Undiscounted risk-neutral density q(K) implied by the smile.
    ///
    /// Must be non-negative for an arbitrage-free smile.
    fn density(&self, strike: f64) -> error::Result<f64>;

    /// Scan for butterfly arbitrage.
    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport>;
}

/// A fitted smile of either supported family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SmileModel {
    Svi(SviSmile),
    Spline(SplineSmile),
}

impl SmileModel {
    /// Model family name.
    pub fn name(&self) -> &'static str {
        match self {
            SmileModel::Svi(_) => "SVI",
            SmileModel::Spline(_) => "BSpline",
        }
    }

    fn section(&self) -> &dyn SmileSection {
        match self {
            SmileModel::Svi(s) => s,
            SmileModel::Spline(s) => s,
        }
    }
}

impl SmileSection for SmileModel {
    fn total_variance(&self, k: f64) -> error::Result<Variance> {
        self.section().total_variance(k)
    }

    fn forward(&self) -> f64 {
        self.section().forward()
    }

    fn expiry(&self) -> f64 {
        self.section().expiry()
    }

    fn density(&self, strike: f64) -> error::Result<f64> {
        self.section().density(strike)
    }

    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport> {
        self.section().is_arbitrage_free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn model_delegates_to_inner_smile() {
        let svi = SviSmile::new(100.0, 0.5, 0.02, 0.1, -0.3, 0.0, 0.2).unwrap();
        let model = SmileModel::Svi(svi.clone());
        assert_eq!(model.name(), "SVI");
        assert_abs_diff_eq!(model.forward(), 100.0);
        let a = model.vol(90.0).unwrap().0;
        let b = svi.vol(90.0).unwrap().0;
        assert_abs_diff_eq!(a, b, epsilon = 1e-15);
    }

    #[test]
    fn variance_is_vol_squared_times_expiry() {
        let model = SmileModel::Svi(SviSmile::new(100.0, 0.5, 0.02, 0.1, -0.3, 0.0, 0.2).unwrap());
        let v = model.vol(110.0).unwrap().0;
        let w = model.variance(110.0).unwrap().0;
        assert_abs_diff_eq!(w, v * v * 0.5, epsilon = 1e-14);
        let k = (110.0_f64 / 100.0).ln();
        assert_abs_diff_eq!(model.total_variance(k).unwrap().0, w, epsilon = 1e-14);
    }

    #[test]
    fn tagged_serde_round_trip() {
        let model = SmileModel::Svi(SviSmile::new(100.0, 0.5, 0.02, 0.1, -0.3, 0.0, 0.2).unwrap());
        let json = serde_json::to_string(&model).unwrap();
        assert!(json.contains("\"model\":\"svi\""));
        let back: SmileModel = serde_json::from_str(&json).unwrap();
        assert_abs_diff_eq!(back.vol(95.0).unwrap().0, model.vol(95.0).unwrap().0);
    }
}
