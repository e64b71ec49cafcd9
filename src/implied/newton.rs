//! Newton-Raphson on the pricing formula with vega as derivative.
//!
//! Prices are increasing in volatility, so the sign of `model − observed`
//! at each iterate tightens a bracket around the root. A Newton step that
//! leaves the bracket, or a vega too small to divide by, is replaced by a
//! bisection step.

use std::f64::consts::PI;

use crate::error::VolProbError;
use crate::market::ExpiryContext;
use crate::pricing::PricingEngine;
use crate::types::OptionType;

use super::SolverConfig;

/// Vega below this is treated as numerically zero.
const MIN_VEGA: f64 = 1e-12;

/// Corrado-Miller seed volatility.
///
/// Puts are mapped to the undiscounted call through parity. A negative
/// discriminant is floored at zero, which keeps the seed usable far from
/// the money.
pub(crate) fn initial_guess(
    ctx: &ExpiryContext,
    strike: f64,
    price: f64,
    option_type: OptionType,
    config: &SolverConfig,
) -> f64 {
    let f = ctx.forward;
    let undiscounted = price / ctx.discount;
    let call = match option_type {
        OptionType::Call => undiscounted,
        OptionType::Put => undiscounted + f - strike,
    };
    let half_gap = call - 0.5 * (f - strike);
    let disc = (half_gap * half_gap - (f - strike).powi(2) / PI).max(0.0);
    let total_sd = (2.0 * PI).sqrt() / (f + strike) * (half_gap + disc.sqrt());
    let seed = total_sd / ctx.time_to_expiry.sqrt();
    if seed.is_finite() {
        seed.clamp(config.vol_min.max(1e-4), config.vol_max)
    } else {
        0.5 * (config.vol_min + config.vol_max)
    }
}

/// Iterate from `seed` until the step falls below tolerance.
///
/// Returns the volatility and iteration count.
pub(crate) fn solve(
    engine: PricingEngine,
    ctx: &ExpiryContext,
    strike: f64,
    price: f64,
    option_type: OptionType,
    seed: f64,
    config: &SolverConfig,
) -> crate::error::Result<(f64, usize)> {
    let (mut lo, mut hi) = (config.vol_min, config.vol_max);
    let mut sigma = seed.clamp(lo, hi);
    for iter in 1..=config.max_iter {
        let diff = engine.price(ctx, strike, sigma, option_type) - price;
        if diff.is_nan() {
            return Err(VolProbError::NonConvergence {
                strike,
                iterations: iter,
                reason: format!("price undefined at vol {sigma}"),
            });
        }
        if diff == 0.0 {
            return Ok((sigma, iter));
        }
        if diff > 0.0 {
            hi = sigma;
        } else {
            lo = sigma;
        }

        let vega = engine.vega(ctx, strike, sigma);
        let newton = sigma - diff / vega;
        let next = if vega > MIN_VEGA && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        let step = (next - sigma).abs();
        sigma = next;
        if step < config.tolerance {
            return Ok((sigma, iter));
        }
    }
    Err(VolProbError::NonConvergence {
        strike,
        iterations: config.max_iter,
        reason: format!("step did not shrink below {}", config.tolerance),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketContext;
    use chrono::{Duration, NaiveDate};

    fn ctx_for(days: i64) -> ExpiryContext {
        let val = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        MarketContext::new(val, 100.0, 0.05)
            .unwrap()
            .at_expiry(val + Duration::days(days))
            .unwrap()
    }

    #[test]
    fn seed_is_close_near_the_money() {
        let ctx = ctx_for(90);
        let config = SolverConfig::default();
        for ot in [OptionType::Call, OptionType::Put] {
            let p = PricingEngine::Black76.price(&ctx, 100.0, 0.3, ot);
            let seed = initial_guess(&ctx, 100.0, p, ot, &config);
            assert!((seed - 0.3).abs() < 0.01, "{seed}");
        }
    }

    #[test]
    fn off_the_money_seed_is_in_range() {
        let ctx = ctx_for(180);
        let config = SolverConfig::default();
        let p = PricingEngine::Black76.price(&ctx, 80.0, 0.35, OptionType::Put);
        let seed = initial_guess(&ctx, 80.0, p, OptionType::Put, &config);
        assert!((1e-4..=config.vol_max).contains(&seed), "{seed}");
    }

    #[test]
    fn bad_seed_still_converges() {
        let ctx = ctx_for(180);
        let config = SolverConfig::default();
        let p = PricingEngine::Black76.price(&ctx, 80.0, 0.35, OptionType::Put);
        for seed in [1e-6, 0.01, 4.9] {
            let engine = PricingEngine::Black76;
            let (vol, _) = solve(engine, &ctx, 80.0, p, OptionType::Put, seed, &config).unwrap();
            assert!((vol - 0.35).abs() < 1e-6, "seed {seed}: {vol}");
        }
    }
}
