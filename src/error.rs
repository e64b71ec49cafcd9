//! Error types for the volprob library.
//!
//! All fallible operations return `Result<T, VolProbError>` rather than panicking.
//! Variants carry enough context (strike, expiry, counts, grid position) to
//! diagnose a failure without re-running the pipeline.

use chrono::NaiveDate;
use thiserror::Error;

/// Convenience type alias for results in this crate.
pub type Result<T> = std::result::Result<T, VolProbError>;

/// Errors that can occur while turning option quotes into distributions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VolProbError {
    /// Too few usable quotes or strikes remain.
    #[error("insufficient data: {message} (have {available}, need {required})")]
    InsufficientData {
        message: String,
        available: usize,
        required: usize,
    },

    /// Observed price lies outside the range reachable by any volatility.
    #[error(
        "no volatility bracket for strike {strike}: \
         price {price} outside [{lower_bound}, {upper_bound}]"
    )]
    NoBracket {
        strike: f64,
        price: f64,
        lower_bound: f64,
        upper_bound: f64,
    },

    /// Derivative-based implied vol iteration did not settle.
    #[error(
        "implied vol did not converge at strike {strike} \
         after {iterations} iterations: {reason}"
    )]
    NonConvergence {
        strike: f64,
        iterations: usize,
        reason: String,
    },

    /// Smile calibration failed to produce a feasible model.
    #[error("calibration failed: {message}")]
    CalibrationError {
        message: String,
        /// Model that failed (e.g., "SVI", "BSpline").
        model: &'static str,
        /// Final RMS error, if available.
        rms_error: Option<f64>,
    },

    /// Raw density had too much negative mass to be repaired.
    #[error(
        "density quality too poor: negative mass fraction {negative_mass_fraction:.4} \
         exceeds {limit} (worst at price {worst_price})"
    )]
    DensityQuality {
        negative_mass_fraction: f64,
        limit: f64,
        worst_price: f64,
    },

    /// Query bounds are malformed.
    #[error("invalid range: lower bound {lo} exceeds upper bound {hi}")]
    InvalidRange { lo: f64, hi: f64 },

    /// Spot-based pricing selected without a dividend yield or schedule.
    #[error("{engine} pricing requires a dividend yield or dividend schedule")]
    MissingDividendInfo { engine: &'static str },

    /// No distribution or curve is stored for the requested expiry.
    #[error("no entry for expiry {expiry}")]
    ExpiryNotFound { expiry: NaiveDate },

    /// Input data is invalid (e.g., negative price, expiry before valuation).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Numerical computation failed (e.g., NaN, negative variance).
    #[error("numerical error: {message}")]
    NumericalError { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_error_fields_accessible() {
        let err = VolProbError::CalibrationError {
            message: "no feasible candidate".into(),
            model: "SVI",
            rms_error: Some(0.05),
        };
        match &err {
            VolProbError::CalibrationError {
                message,
                model,
                rms_error,
            } => {
                assert_eq!(message, "no feasible candidate");
                assert_eq!(*model, "SVI");
                assert_eq!(*rms_error, Some(0.05));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn insufficient_data_reports_counts() {
        let err = VolProbError::InsufficientData {
            message: "distinct strikes".into(),
            available: 3,
            required: 5,
        };
        let display = err.to_string();
        assert!(display.contains("have 3"));
        assert!(display.contains("need 5"));
    }

    #[test]
    fn no_bracket_includes_strike_and_bounds() {
        let err = VolProbError::NoBracket {
            strike: 90.0,
            price: 1.0,
            lower_bound: 10.0,
            upper_bound: 100.0,
        };
        let display = err.to_string();
        assert!(display.contains("strike 90"));
        assert!(display.contains("[10, 100]"));
    }

    #[test]
    fn error_display_includes_context() {
        let err = VolProbError::InvalidRange { lo: 2.0, hi: 1.0 };
        assert!(err.to_string().contains("lower bound 2"));

        let err = VolProbError::MissingDividendInfo {
            engine: "Black-Scholes",
        };
        assert!(err.to_string().contains("Black-Scholes"));

        let expiry = NaiveDate::from_ymd_opt(2025, 3, 21).unwrap();
        let err = VolProbError::ExpiryNotFound { expiry };
        assert!(err.to_string().contains("2025-03-21"));

        let err = VolProbError::NumericalError {
            message: "NaN detected".into(),
        };
        assert!(err.to_string().contains("NaN detected"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VolProbError>();
    }
}
