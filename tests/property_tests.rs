//! Property-based tests using proptest.
//!
//! These tests verify invariant properties across random inputs rather than
//! testing fixed examples.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;
use volprob::config::SviOptions;
use volprob::conventions;
use volprob::implied::{SolverConfig, SolverMethod, implied_vol};
use volprob::pricing::PricingEngine;
use volprob::smile::{ImpliedVolPoint, SmileSection, SviSmile};
use volprob::{
    DensityExtractor, Distribution, FitConfig, GridSpec, MarketContext, OptionType, SmileCalibrator,
    VolProbError,
};

fn valuation() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()
}

// --- SVI evaluation ---

proptest! {
    /// Valid SVI parameters give non-negative vols with variance = vol² · T.
    #[test]
    fn svi_vol_and_variance_agree(
        a in 0.01_f64..0.10,
        b in 0.05_f64..0.30,
        rho in -0.9_f64..0.9,
        m in -0.5_f64..0.5,
        sigma in 0.05_f64..0.5,
    ) {
        let expiry = 0.25;
        let smile = SviSmile::new(100.0, expiry, a, b, rho, m, sigma);
        prop_assume!(smile.is_ok());
        let smile = smile.unwrap();

        for strike in [60.0, 80.0, 100.0, 120.0, 150.0] {
            let vol = smile.vol(strike).unwrap();
            let var = smile.variance(strike).unwrap();
            prop_assert!(vol.0 >= 0.0);
            prop_assert!(
                (var.0 - vol.0 * vol.0 * expiry).abs() < 1e-12,
                "variance {} vs vol² T {}", var.0, vol.0 * vol.0 * expiry
            );
        }
    }
}

// --- SVI calibration ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Fitting SVI to its own vols reproduces the smile and keeps the
    /// fitted parameters admissible.
    #[test]
    fn svi_refit_recovers_smile(
        a in 0.01_f64..0.05,
        b in 0.05_f64..0.30,
        rho in -0.7_f64..0.3,
        m in -0.1_f64..0.1,
        sigma in 0.1_f64..0.4,
    ) {
        let (forward, expiry) = (100.0, 0.5);
        let truth = SviSmile::new(forward, expiry, a, b, rho, m, sigma);
        prop_assume!(truth.is_ok());
        let truth = truth.unwrap();

        let strikes: Vec<f64> = (0..19).map(|i| 60.0 + 5.0 * i as f64).collect();
        let points: Vec<(f64, f64, f64)> = strikes
            .iter()
            .map(|&k| (k, truth.vol(k).unwrap().0, 1.0))
            .collect();
        let fit = SviSmile::calibrate(forward, expiry, &points, &SviOptions::default()).unwrap();

        prop_assert!(fit.smile.b() >= 0.0);
        prop_assert!(fit.smile.rho().abs() < 1.0);
        prop_assert!(fit.smile.sigma() > 0.0);
        for &(k, vol, _) in &points {
            let got = fit.smile.vol(k).unwrap().0;
            prop_assert!((got - vol).abs() < 2e-3, "strike {k}: {got} vs {vol}");
        }
    }
}

// --- Implied volatility ---

proptest! {
    /// Pricing then inverting returns the input vol for out-of-the-money
    /// options under either engine and solver.
    #[test]
    fn implied_vol_round_trip(
        vol in 0.05_f64..2.0,
        days in 7_i64..730,
        z in -1.5_f64..1.5,
        q in 0.0_f64..0.04,
        spot_engine in any::<bool>(),
        newton in any::<bool>(),
    ) {
        let market = MarketContext::new(valuation(), 100.0, 0.03)
            .unwrap()
            .with_dividend_yield(q)
            .unwrap();
        let ctx = market.at_expiry(valuation() + Duration::days(days)).unwrap();
        let strike = ctx.forward * (z * vol * ctx.time_to_expiry.sqrt()).exp();
        let ot = if strike >= ctx.forward { OptionType::Call } else { OptionType::Put };
        let engine = if spot_engine { PricingEngine::BlackScholes } else { PricingEngine::Black76 };
        let method = if newton { SolverMethod::DerivativeBased } else { SolverMethod::Bracketing };
        let config = SolverConfig::default().with_method(method);

        let price = engine.price(&ctx, strike, vol, ot);
        let iv = implied_vol(price, strike, ot, &ctx, engine, &config).unwrap();
        prop_assert!((iv.0 - vol).abs() < 1e-5, "{} vs {vol}", iv.0);
    }
}

// --- Distribution queries ---

fn reference_distribution() -> &'static Distribution {
    static DIST: OnceLock<Distribution> = OnceLock::new();
    DIST.get_or_init(|| {
        let market = MarketContext::new(valuation(), 100.0, 0.03).unwrap();
        let expiry = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap();
        let ctx = market.at_expiry(expiry).unwrap();
        let points: Vec<ImpliedVolPoint> = (0..17)
            .map(|i| {
                let strike = 60.0 + 5.0 * i as f64;
                let k = (strike / ctx.forward).ln();
                ImpliedVolPoint::new(strike, expiry, 0.24 - 0.1 * k + 0.2 * k * k)
            })
            .collect();
        let config = FitConfig::default();
        let curve = SmileCalibrator::new(&config).fit(&ctx, &points).unwrap();
        DensityExtractor::derive(&curve, &market, &GridSpec::default()).unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any smile that calibrates and passes the quality gate yields a
    /// non-negative density with unit mass and a monotone cdf.
    #[test]
    fn calibrated_smiles_give_probability_densities(
        a in 0.005_f64..0.06,
        b in 0.02_f64..0.4,
        rho in -0.8_f64..0.5,
        m in -0.2_f64..0.2,
        sigma in 0.05_f64..0.5,
    ) {
        let market = MarketContext::new(valuation(), 100.0, 0.03).unwrap();
        let expiry = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap();
        let ctx = market.at_expiry(expiry).unwrap();
        let truth = SviSmile::new(ctx.forward, ctx.time_to_expiry, a, b, rho, m, sigma);
        prop_assume!(truth.is_ok());
        let truth = truth.unwrap();

        let points: Vec<ImpliedVolPoint> = (0..17)
            .map(|i| {
                let strike = 60.0 + 5.0 * i as f64;
                ImpliedVolPoint::new(strike, expiry, truth.vol(strike).unwrap().0)
            })
            .collect();
        let config = FitConfig::default();
        let curve = SmileCalibrator::new(&config).fit(&ctx, &points);
        prop_assume!(curve.is_ok());
        let derived = DensityExtractor::derive(&curve.unwrap(), &market, &GridSpec::default());
        prop_assume!(!matches!(derived, Err(VolProbError::DensityQuality { .. })));
        let d = derived.unwrap();

        prop_assert!(d.pdf().iter().all(|&f| f >= 0.0));
        let mass: f64 = d
            .prices()
            .windows(2)
            .zip(d.pdf().windows(2))
            .map(|(x, f)| 0.5 * (f[0] + f[1]) * (x[1] - x[0]))
            .sum();
        prop_assert!((mass - 1.0).abs() < 1e-6, "mass {}", mass);
        prop_assert!(d.cdf().windows(2).all(|c| c[1] >= c[0]));
        prop_assert!((d.cdf()[d.cdf().len() - 1] - 1.0).abs() < 1e-6);
    }
}

proptest! {
    #[test]
    fn prob_below_and_above_sum_to_one(x in 0.0_f64..500.0) {
        let d = reference_distribution();
        let below = d.prob_below(x);
        prop_assert!((0.0..=1.0).contains(&below));
        prop_assert_eq!(below + d.prob_above(x), 1.0);
    }

    #[test]
    fn prob_between_is_non_negative_and_monotone(
        lo in 20.0_f64..200.0,
        width in 0.0_f64..100.0,
        extra in 0.0_f64..50.0,
    ) {
        let d = reference_distribution();
        let p = d.prob_between(lo, lo + width).unwrap();
        let wider = d.prob_between(lo, lo + width + extra).unwrap();
        prop_assert!(p >= 0.0);
        prop_assert!(wider >= p);
    }

    #[test]
    fn quantile_inverts_prob_below(p in 0.01_f64..0.99) {
        let d = reference_distribution();
        let x = d.quantile(p).unwrap();
        prop_assert!((d.prob_below(x) - p).abs() < 1e-9);
    }
}

// --- Conventions ---

proptest! {
    #[test]
    fn log_moneyness_exp_equals_moneyness(
        strike in 1.0_f64..1000.0,
        forward in 1.0_f64..1000.0,
    ) {
        let k = conventions::log_moneyness(strike, forward);
        prop_assert!((k.exp() - strike / forward).abs() < 1e-12 * (strike / forward).max(1.0));
    }

    #[test]
    fn parity_forward_inverts_parity(
        strike in 50.0_f64..150.0,
        forward in 50.0_f64..150.0,
        discount in 0.8_f64..1.0,
        put in 0.1_f64..20.0,
    ) {
        let call = put + discount * (forward - strike);
        prop_assume!(call > 0.0);
        let f = conventions::parity_forward(strike, call, put, discount);
        prop_assert!((f - forward).abs() < 1e-9);
    }
}
