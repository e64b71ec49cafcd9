//! Black (1976) forward-based pricing.
//!
//! ```text
//! C = DF · [F·N(d₁) − K·N(d₂)]
//! P = DF · [K·N(−d₂) − F·N(−d₁)]
//! d₁ = (ln(F/K) + σ²T/2) / (σ√T),  d₂ = d₁ − σ√T
//! ```

use super::{norm_cdf, norm_pdf};
use crate::types::OptionType;

/// Discounted Black price of a European option on the forward.
///
/// A vanishing `σ√T` returns the discounted intrinsic value.
pub fn price(
    forward: f64,
    strike: f64,
    vol: f64,
    expiry: f64,
    discount: f64,
    option_type: OptionType,
) -> f64 {
    let std_dev = vol * expiry.sqrt();
    let sign = option_type.sign();
    if std_dev <= f64::EPSILON {
        return discount * (sign * (forward - strike)).max(0.0);
    }
    let d1 = ((forward / strike).ln() + 0.5 * std_dev * std_dev) / std_dev;
    let d2 = d1 - std_dev;
    discount * sign * (forward * norm_cdf(sign * d1) - strike * norm_cdf(sign * d2))
}

/// Black vega ∂price/∂σ (identical for calls and puts).
pub fn vega(forward: f64, strike: f64, vol: f64, expiry: f64, discount: f64) -> f64 {
    let sqrt_t = expiry.sqrt();
    let std_dev = vol * sqrt_t;
    if std_dev <= f64::EPSILON {
        return 0.0;
    }
    let d1 = ((forward / strike).ln() + 0.5 * std_dev * std_dev) / std_dev;
    discount * forward * norm_pdf(d1) * sqrt_t
}
