//! Market conventions: day counting, rate compounding and moneyness.
//!
//! Every model in the crate works with continuously compounded rates and
//! ACT/365 year fractions. Quoted rates in other conventions are converted
//! here once, at the edge.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Days per year for ACT/365 year fractions.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Compounding convention of a quoted risk-free rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateCompounding {
    /// `DF = exp(−rT)`.
    #[default]
    Continuous,
    /// `DF = (1 + r)^(−T)`.
    Annual,
    /// `DF = 1 / (1 + rT)`.
    Simple,
}

impl RateCompounding {
    /// Continuously compounded equivalent of `rate` over `expiry` years.
    pub fn to_continuous(self, rate: f64, expiry: f64) -> f64 {
        match self {
            RateCompounding::Continuous => rate,
            RateCompounding::Annual => rate.ln_1p(),
            RateCompounding::Simple => {
                if expiry <= 0.0 {
                    rate
                } else {
                    (rate * expiry).ln_1p() / expiry
                }
            }
        }
    }
}

/// ACT/365 year fraction between two dates (negative if `to` precedes `from`).
pub fn year_fraction(from: NaiveDate, to: NaiveDate) -> f64 {
    (to - from).num_days() as f64 / DAYS_PER_YEAR
}

/// Convert a strike to log-moneyness: k = ln(K / F).
pub fn log_moneyness(strike: f64, forward: f64) -> f64 {
    (strike / forward).ln()
}

/// Carry forward from spot: F = S · exp((r − q) · T).
pub fn forward_price(spot: f64, rate: f64, dividend_yield: f64, expiry: f64) -> f64 {
    spot * ((rate - dividend_yield) * expiry).exp()
}

/// Forward implied by put-call parity at a single strike: F = K + (C − P) / DF.
pub fn parity_forward(strike: f64, call: f64, put: f64, discount: f64) -> f64 {
    strike + (call - put) / discount
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn year_fraction_act_365() {
        let a = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_abs_diff_eq!(year_fraction(a, b), 30.0 / 365.0, epsilon = 1e-15);
        assert!(year_fraction(b, a) < 0.0);
    }

    #[test]
    fn annual_rate_converts_to_log() {
        let r = RateCompounding::Annual.to_continuous(0.05, 2.0);
        assert_abs_diff_eq!(r, 1.05_f64.ln(), epsilon = 1e-15);
    }

    #[test]
    fn simple_rate_matches_discount_factor() {
        let t = 0.5;
        let r = RateCompounding::Simple.to_continuous(0.04, t);
        assert_abs_diff_eq!((-r * t).exp(), 1.0 / (1.0 + 0.04 * t), epsilon = 1e-15);
    }

    #[test]
    fn parity_forward_recovers_forward() {
        // C − P = DF · (F − K)
        let (f, k, df) = (105.0, 100.0, 0.98);
        let c = 8.0;
        let p = c - df * (f - k);
        assert_abs_diff_eq!(parity_forward(k, c, p, df), f, epsilon = 1e-12);
    }

    #[test]
    fn forward_with_yield() {
        let f = forward_price(100.0, 0.05, 0.02, 1.0);
        assert_abs_diff_eq!(f, 100.0 * 0.03_f64.exp(), epsilon = 1e-12);
    }
}
