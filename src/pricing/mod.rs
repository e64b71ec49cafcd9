//! Closed-form European option pricing.
//!
//! Two engines are available:
//!
//! - [`PricingEngine::Black76`] — forward-based Black formula; dividends only
//!   enter through the forward and are optional.
//! - [`PricingEngine::BlackScholes`] — spot-based Black-Scholes-Merton; a
//!   dividend yield or schedule is mandatory.
//!
//! Both price off an [`ExpiryContext`], so the same fitted smile reprices
//! identically under either engine when the carry is consistent.

pub mod black76;
pub mod bsm;

use serde::{Deserialize, Serialize};

use crate::error::{self, VolProbError};
use crate::market::{ExpiryContext, MarketContext};
use crate::types::OptionType;

/// Standard normal CDF.
pub(crate) fn norm_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal PDF.
pub(crate) fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Pricing formula used for implied vol inversion and density repricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingEngine {
    /// Forward-based Black (1976).
    #[default]
    Black76,
    /// Spot-based Black-Scholes-Merton.
    BlackScholes,
}

impl PricingEngine {
    /// Human-readable engine name.
    pub fn name(self) -> &'static str {
        match self {
            PricingEngine::Black76 => "Black76",
            PricingEngine::BlackScholes => "Black-Scholes",
        }
    }

    /// Check that the market context carries what this engine needs.
    ///
    /// # Errors
    /// Returns [`VolProbError::MissingDividendInfo`] for the spot-based engine
    /// when neither a dividend yield nor a schedule is present.
    pub fn require_inputs(self, market: &MarketContext) -> error::Result<()> {
        if self == PricingEngine::BlackScholes && !market.has_dividend_info() {
            return Err(VolProbError::MissingDividendInfo {
                engine: self.name(),
            });
        }
        Ok(())
    }

    /// Present value of a European option.
    pub fn price(self, ctx: &ExpiryContext, strike: f64, vol: f64, option_type: OptionType) -> f64 {
        match self {
            PricingEngine::Black76 => black76::price(
                ctx.forward,
                strike,
                vol,
                ctx.time_to_expiry,
                ctx.discount,
                option_type,
            ),
            PricingEngine::BlackScholes => bsm::price(
                ctx.spot,
                strike,
                vol,
                ctx.rate,
                ctx.dividend_yield,
                ctx.time_to_expiry,
                option_type,
            ),
        }
    }

    /// Sensitivity of [`price`](Self::price) to volatility.
    pub fn vega(self, ctx: &ExpiryContext, strike: f64, vol: f64) -> f64 {
        match self {
            PricingEngine::Black76 => {
                black76::vega(ctx.forward, strike, vol, ctx.time_to_expiry, ctx.discount)
            }
            PricingEngine::BlackScholes => bsm::vega(
                ctx.spot,
                strike,
                vol,
                ctx.rate,
                ctx.dividend_yield,
                ctx.time_to_expiry,
            ),
        }
    }

    /// No-arbitrage price bounds `(intrinsic, upper)` for any volatility.
    pub fn bounds(self, ctx: &ExpiryContext, strike: f64, option_type: OptionType) -> (f64, f64) {
        let fwd_pv = match self {
            PricingEngine::Black76 => ctx.discount * ctx.forward,
            PricingEngine::BlackScholes => {
                ctx.spot * (-ctx.dividend_yield * ctx.time_to_expiry).exp()
            }
        };
        let strike_pv = ctx.discount * strike;
        match option_type {
            OptionType::Call => ((fwd_pv - strike_pv).max(0.0), fwd_pv),
            OptionType::Put => ((strike_pv - fwd_pv).max(0.0), strike_pv),
        }
    }
}
