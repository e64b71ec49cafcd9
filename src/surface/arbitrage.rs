//! Surface-level arbitrage diagnostics.
//!
//! Extends the per-smile butterfly checks with cross-expiry calendar spread
//! checks: total variance must be non-decreasing in time at every
//! log-moneyness.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error;
use crate::smile::{ArbitrageReport, FittedVolCurve};

/// Log-moneyness range scanned for calendar arbitrage.
const K_RANGE: (f64, f64) = (-1.0, 1.0);
/// Points in the calendar scan.
const N_POINTS: usize = 41;
/// Variance decrease tolerated before flagging.
const TOL: f64 = 1e-10;

/// Diagnostics for a fitted surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceDiagnostics {
    /// Per-expiry butterfly reports.
    pub smile_reports: BTreeMap<NaiveDate, ArbitrageReport>,
    /// Calendar spread violations between consecutive expiries.
    pub calendar_violations: Vec<CalendarViolation>,
    /// Whether every check passed.
    pub is_free: bool,
}

/// Total variance falling between two consecutive expiries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarViolation {
    /// Log-moneyness `ln(K/F)` where the violation occurs.
    pub log_moneyness: f64,
    pub expiry_short: NaiveDate,
    pub expiry_long: NaiveDate,
    /// Total variance at the shorter expiry (should be smaller).
    pub variance_short: f64,
    /// Total variance at the longer expiry (should be larger).
    pub variance_long: f64,
}

/// Scan consecutive curves (in any order) for calendar arbitrage.
///
/// Each curve is evaluated at its own log-moneyness, so differing forwards
/// are handled consistently.
pub fn calendar_violations(curves: &[&FittedVolCurve]) -> error::Result<Vec<CalendarViolation>> {
    let mut sorted: Vec<&FittedVolCurve> = curves.to_vec();
    sorted.sort_by(|a, b| a.time_to_expiry().total_cmp(&b.time_to_expiry()));

    let mut violations = Vec::new();
    for pair in sorted.windows(2) {
        let (short, long) = (pair[0], pair[1]);
        for i in 0..N_POINTS {
            let k = K_RANGE.0 + (K_RANGE.1 - K_RANGE.0) * (i as f64) / ((N_POINTS - 1) as f64);
            let w_short = short.total_variance(k)?.0;
            let w_long = long.total_variance(k)?.0;
            if w_long < w_short - TOL {
                violations.push(CalendarViolation {
                    log_moneyness: k,
                    expiry_short: short.expiry(),
                    expiry_long: long.expiry(),
                    variance_short: w_short,
                    variance_long: w_long,
                });
            }
        }
    }

    #[cfg(feature = "logging")]
    {
        if !violations.is_empty() {
            tracing::warn!(
                n_violations = violations.len(),
                "calendar arbitrage detected between fitted expiries"
            );
        }
    }

    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitConfig;
    use crate::market::MarketContext;
    use crate::smile::{ImpliedVolPoint, SmileCalibrator};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn flat_curve(expiry: NaiveDate, vol: f64) -> FittedVolCurve {
        let market = MarketContext::new(date(2025, 1, 2), 100.0, 0.03).unwrap();
        let ctx = market.at_expiry(expiry).unwrap();
        let points: Vec<_> = (0..9)
            .map(|i| ImpliedVolPoint::new(80.0 + 5.0 * i as f64, expiry, vol))
            .collect();
        let config = FitConfig::default();
        SmileCalibrator::new(&config).fit(&ctx, &points).unwrap()
    }

    #[test]
    fn increasing_variance_is_clean() {
        let a = flat_curve(date(2025, 4, 2), 0.25);
        let b = flat_curve(date(2025, 7, 2), 0.25);
        assert!(calendar_violations(&[&b, &a]).unwrap().is_empty());
    }

    #[test]
    fn collapsing_vol_is_flagged_everywhere() {
        let a = flat_curve(date(2025, 4, 2), 0.40);
        let b = flat_curve(date(2025, 4, 9), 0.20);
        let v = calendar_violations(&[&a, &b]).unwrap();
        assert_eq!(v.len(), N_POINTS);
        assert!(v.iter().all(|x| x.expiry_short == date(2025, 4, 2)));
        assert!(v.iter().all(|x| x.variance_long < x.variance_short));
    }

    #[test]
    fn single_curve_has_nothing_to_compare() {
        let a = flat_curve(date(2025, 4, 2), 0.25);
        assert!(calendar_violations(&[&a]).unwrap().is_empty());
    }
}
