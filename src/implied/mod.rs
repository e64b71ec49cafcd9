//! Implied volatility extraction from option prices.
//!
//! Inverts a [`PricingEngine`] with one of two root-finders:
//!
//! - [`SolverMethod::Bracketing`] — Brent's method on `[vol_min, vol_max]`;
//!   requires a sign change of `model − observed` and fails with
//!   [`VolProbError::NoBracket`] otherwise.
//! - [`SolverMethod::DerivativeBased`] — Newton-Raphson with vega from a
//!   Corrado-Miller seed, falling back to bisection when a step leaves the
//!   bracket or vega vanishes; fails with [`VolProbError::NonConvergence`]
//!   when the iteration cap is reached.
//!
//! Every returned volatility is repriced and checked against the observed
//! price before it leaves this module.

mod brent;
mod newton;

pub(crate) use brent::brent;

use serde::{Deserialize, Serialize};

use crate::error::{self, VolProbError};
use crate::market::ExpiryContext;
use crate::pricing::PricingEngine;
use crate::types::{OptionType, Vol};
use crate::validate::{validate_finite, validate_positive};

/// Root-finding algorithm for implied volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    /// Brent's method on a volatility bracket.
    #[default]
    Bracketing,
    /// Newton-Raphson using vega.
    DerivativeBased,
}

/// Implied volatility solver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub method: SolverMethod,
    /// Absolute accuracy on volatility.
    pub tolerance: f64,
    /// Hard cap on solver iterations.
    pub max_iter: usize,
    /// Lower end of the volatility search range.
    pub vol_min: f64,
    /// Upper end of the volatility search range.
    pub vol_max: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            method: SolverMethod::Bracketing,
            tolerance: 1e-6,
            max_iter: 100,
            vol_min: 1e-6,
            vol_max: 5.0,
        }
    }
}

impl SolverConfig {
    /// Same settings with a different root-finder.
    pub fn with_method(mut self, method: SolverMethod) -> Self {
        self.method = method;
        self
    }
}

/// Implied volatility that reproduces `price` under `engine`.
///
/// # Errors
/// - [`VolProbError::InvalidInput`] for a non-positive strike or non-finite price
/// - [`VolProbError::NoBracket`] if the price is outside the no-arbitrage
///   bounds or not reachable inside `[vol_min, vol_max]`
/// - [`VolProbError::NonConvergence`] if Newton stalls or the repriced
///   result misses the observed price
///
/// # Examples
/// ```
/// use chrono::NaiveDate;
/// use volprob::implied::{implied_vol, SolverConfig};
/// use volprob::market::MarketContext;
/// use volprob::pricing::PricingEngine;
/// use volprob::types::OptionType;
///
/// let market = MarketContext::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), 100.0, 0.03)?;
/// let ctx = market.at_expiry(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap())?;
/// let price = PricingEngine::Black76.price(&ctx, 105.0, 0.22, OptionType::Call);
/// let iv = implied_vol(price, 105.0, OptionType::Call, &ctx, PricingEngine::Black76,
///                      &SolverConfig::default())?;
/// assert!((iv.0 - 0.22).abs() < 1e-6);
/// # Ok::<(), volprob::VolProbError>(())
/// ```
pub fn implied_vol(
    price: f64,
    strike: f64,
    option_type: OptionType,
    ctx: &ExpiryContext,
    engine: PricingEngine,
    config: &SolverConfig,
) -> error::Result<Vol> {
    validate_positive(strike, "strike")?;
    validate_finite(price, "option price")?;

    let (lower, upper) = engine.bounds(ctx, strike, option_type);
    let price_tol = 1e-12 * (1.0 + upper);
    if price <= lower + price_tol || price >= upper - price_tol {
        return Err(VolProbError::NoBracket {
            strike,
            price,
            lower_bound: lower,
            upper_bound: upper,
        });
    }

    let objective = |vol: f64| engine.price(ctx, strike, vol, option_type) - price;

    let (vol, iterations) = match config.method {
        SolverMethod::Bracketing => {
            let root = brent(
                objective,
                config.vol_min,
                config.vol_max,
                config.tolerance,
                config.max_iter,
            )
            .ok_or_else(|| VolProbError::NoBracket {
                strike,
                price,
                lower_bound: engine.price(ctx, strike, config.vol_min, option_type),
                upper_bound: engine.price(ctx, strike, config.vol_max, option_type),
            })?;
            (root.root, root.iterations)
        }
        SolverMethod::DerivativeBased => {
            let seed = newton::initial_guess(ctx, strike, price, option_type, config);
            newton::solve(engine, ctx, strike, price, option_type, seed, config)?
        }
    };

    // Reprice: a root that misses the observed price is never returned.
    let residual = objective(vol).abs();
    let allowed = 8.0 * engine.vega(ctx, strike, vol) * config.tolerance + price_tol;
    if !vol.is_finite() || residual > allowed {
        return Err(VolProbError::NonConvergence {
            strike,
            iterations,
            reason: format!("repricing residual {residual:e} exceeds {allowed:e} at vol {vol}"),
        });
    }
    Ok(Vol(vol))
}
