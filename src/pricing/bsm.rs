//! Black-Scholes-Merton spot-based pricing with a continuous yield.

use super::{norm_cdf, norm_pdf};
use crate::types::OptionType;

/// Black-Scholes-Merton price of a European option on spot.
///
/// `dividend_yield` is the continuous carry `q`; a vanishing `σ√T` returns
/// the discounted intrinsic value of the forward.
pub fn price(
    spot: f64,
    strike: f64,
    vol: f64,
    rate: f64,
    dividend_yield: f64,
    expiry: f64,
    option_type: OptionType,
) -> f64 {
    let std_dev = vol * expiry.sqrt();
    let sign = option_type.sign();
    let spot_df = (-dividend_yield * expiry).exp();
    let strike_df = (-rate * expiry).exp();
    if std_dev <= f64::EPSILON {
        return (sign * (spot * spot_df - strike * strike_df)).max(0.0);
    }
    let d1 = ((spot / strike).ln() + (rate - dividend_yield) * expiry
        + 0.5 * std_dev * std_dev)
        / std_dev;
    let d2 = d1 - std_dev;
    sign * (spot * spot_df * norm_cdf(sign * d1) - strike * strike_df * norm_cdf(sign * d2))
}

/// Black-Scholes-Merton vega.
pub fn vega(
    spot: f64,
    strike: f64,
    vol: f64,
    rate: f64,
    dividend_yield: f64,
    expiry: f64,
) -> f64 {
    let sqrt_t = expiry.sqrt();
    let std_dev = vol * sqrt_t;
    if std_dev <= f64::EPSILON {
        return 0.0;
    }
    let d1 = ((spot / strike).ln() + (rate - dividend_yield) * expiry
        + 0.5 * std_dev * std_dev)
        / std_dev;
    spot * (-dividend_yield * expiry).exp() * norm_pdf(d1) * sqrt_t
}
