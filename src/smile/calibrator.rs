//! Single-expiry calibration: quotes in, [`FittedVolCurve`] out.
//!
//! The quote pipeline is: filter and price selection, forward resolution,
//! out-of-the-money selection, implied vol inversion (failed inversions are
//! dropped and counted), weighting, then a fit of the configured model in
//! total-variance space.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{FitConfig, ForwardSource, SmileMethod};
use crate::error::{self, VolProbError};
use crate::implied::implied_vol;
use crate::market::{ExpiryContext, MarketContext};
use crate::pricing::PricingEngine;
use crate::quotes::{self, FilterReport, OptionQuote};
use crate::smile::{ArbitrageReport, SmileModel, SmileSection, SplineSmile, SviSmile};
use crate::types::{OptionType, Variance, Vol};
use crate::validate::validate_positive;

/// One implied volatility observation with its fitting weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpliedVolPoint {
    pub strike: f64,
    pub expiry: NaiveDate,
    pub implied_vol: f64,
    pub weight: f64,
}

impl ImpliedVolPoint {
    pub fn new(strike: f64, expiry: NaiveDate, implied_vol: f64) -> Self {
        Self {
            strike,
            expiry,
            implied_vol,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Fit quality and bookkeeping for one curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationDiagnostics {
    /// Model family fitted.
    pub model: String,
    /// Optimizer used for the fit.
    pub optimizer: String,
    /// Weighted residual sum of squares in total variance.
    pub rss: f64,
    /// Unweighted root mean square error in volatility.
    pub rmse_vol: f64,
    /// Largest absolute volatility residual.
    pub max_abs_error: f64,
    pub n_points: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Butterfly scan of the fitted smile.
    pub arbitrage: ArbitrageReport,
    /// Optimizer parameters that ended on their search bound.
    #[serde(default)]
    pub at_bound: Vec<String>,
    /// Quotes whose implied vol could not be extracted.
    pub dropped_quotes: usize,
    /// Present when the curve was fitted from quotes.
    pub filter: Option<FilterReport>,
}

/// A calibrated smile for one expiry together with its market context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedVolCurve {
    context: ExpiryContext,
    engine: PricingEngine,
    model: SmileModel,
    atm_vol: f64,
    diagnostics: CalibrationDiagnostics,
}

impl FittedVolCurve {
    pub fn expiry(&self) -> NaiveDate {
        self.context.expiry
    }

    pub fn time_to_expiry(&self) -> f64 {
        self.context.time_to_expiry
    }

    pub fn forward(&self) -> f64 {
        self.context.forward
    }

    /// Market context the curve was fitted under.
    pub fn context(&self) -> &ExpiryContext {
        &self.context
    }

    pub fn engine(&self) -> PricingEngine {
        self.engine
    }

    pub fn model(&self) -> &SmileModel {
        &self.model
    }

    /// Fitted volatility at the forward.
    pub fn atm_vol(&self) -> f64 {
        self.atm_vol
    }

    pub fn diagnostics(&self) -> &CalibrationDiagnostics {
        &self.diagnostics
    }

    pub fn vol(&self, strike: f64) -> error::Result<Vol> {
        self.model.vol(strike)
    }

    pub fn total_variance(&self, k: f64) -> error::Result<Variance> {
        self.model.total_variance(k)
    }

    /// Model price of a European option under the curve's engine.
    pub fn price(&self, strike: f64, option_type: OptionType) -> error::Result<f64> {
        let vol = self.vol(strike)?.0;
        let p = self.engine.price(&self.context, strike, vol, option_type);
        if !p.is_finite() {
            return Err(VolProbError::NumericalError {
                message: format!("non-finite price at strike {strike} (vol {vol})"),
            });
        }
        Ok(p)
    }

    pub fn call_price(&self, strike: f64) -> error::Result<f64> {
        self.price(strike, OptionType::Call)
    }
}

/// Fits one expiry according to a [`FitConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SmileCalibrator<'a> {
    config: &'a FitConfig,
}

impl<'a> SmileCalibrator<'a> {
    pub fn new(config: &'a FitConfig) -> Self {
        Self { config }
    }

    /// Fit the configured model to implied vol points of one expiry.
    ///
    /// Weights are rescaled to mean 1 before fitting.
    ///
    /// # Errors
    /// - [`VolProbError::InvalidInput`] for non-positive vols or weights, or
    ///   points from another expiry
    /// - [`VolProbError::InsufficientData`] when fewer distinct strikes than
    ///   [`FitConfig::required_points`] are supplied
    /// - [`VolProbError::CalibrationError`] if the model fit fails
    pub fn fit(
        &self,
        ctx: &ExpiryContext,
        points: &[ImpliedVolPoint],
    ) -> error::Result<FittedVolCurve> {
        for p in points {
            if p.expiry != ctx.expiry {
                return Err(VolProbError::InvalidInput {
                    message: format!(
                        "point at strike {} has expiry {}, expected {}",
                        p.strike, p.expiry, ctx.expiry
                    ),
                });
            }
            validate_positive(p.strike, "strike")?;
            validate_positive(p.implied_vol, "implied vol")?;
            validate_positive(p.weight, "weight")?;
        }

        let required = self.config.required_points();
        let mut strikes: Vec<f64> = points.iter().map(|p| p.strike).collect();
        strikes.sort_by(f64::total_cmp);
        strikes.dedup();
        if strikes.len() < required {
            return Err(VolProbError::InsufficientData {
                message: format!("too few distinct strikes for expiry {}", ctx.expiry),
                available: strikes.len(),
                required,
            });
        }

        let mean_weight = points.iter().map(|p| p.weight).sum::<f64>() / points.len() as f64;
        let data: Vec<(f64, f64, f64)> = points
            .iter()
            .map(|p| (p.strike, p.implied_vol, p.weight / mean_weight))
            .collect();

        #[cfg(feature = "logging")]
        tracing::debug!(
            expiry = %ctx.expiry,
            model = self.config.method.name(),
            n_points = data.len(),
            forward = ctx.forward,
            "smile calibration started"
        );

        let (model, rss, iterations, converged, optimizer, at_bound) = match &self.config.method {
            SmileMethod::Svi(opts) => {
                let fit = SviSmile::calibrate(ctx.forward, ctx.time_to_expiry, &data, opts)?;
                (
                    SmileModel::Svi(fit.smile),
                    fit.rss,
                    fit.iterations,
                    fit.converged,
                    format!(
                        "quasi-explicit least squares + Nelder-Mead ({} starts)",
                        fit.n_starts
                    ),
                    fit.at_bound.iter().map(ToString::to_string).collect::<Vec<_>>(),
                )
            }
            SmileMethod::BSpline(opts) => {
                let fit = SplineSmile::calibrate(ctx.forward, ctx.time_to_expiry, &data, opts)?;
                (
                    SmileModel::Spline(fit.smile),
                    fit.rss,
                    1,
                    true,
                    "penalized least squares".to_string(),
                    Vec::new(),
                )
            }
        };

        let mut sq_sum = 0.0;
        let mut max_abs_error: f64 = 0.0;
        for p in points {
            let err = model.vol(p.strike)?.0 - p.implied_vol;
            sq_sum += err * err;
            max_abs_error = max_abs_error.max(err.abs());
        }
        let rmse_vol = (sq_sum / points.len() as f64).sqrt();
        let atm_vol = model.vol(ctx.forward)?.0;
        let arbitrage = model.is_arbitrage_free()?;

        #[cfg(feature = "logging")]
        tracing::debug!(
            expiry = %ctx.expiry,
            rss,
            rmse_vol,
            atm_vol,
            iterations,
            arbitrage_free = arbitrage.is_free,
            "smile calibration complete"
        );

        Ok(FittedVolCurve {
            context: *ctx,
            engine: self.config.pricing_engine,
            diagnostics: CalibrationDiagnostics {
                model: model.name().to_string(),
                optimizer,
                rss,
                rmse_vol,
                max_abs_error,
                n_points: points.len(),
                iterations,
                converged,
                arbitrage,
                at_bound,
                dropped_quotes: 0,
                filter: None,
            },
            model,
            atm_vol,
        })
    }

    /// Run the full quote pipeline for one expiry.
    ///
    /// Quotes for other expiries are ignored.
    ///
    /// # Errors
    /// - [`VolProbError::MissingDividendInfo`] if the engine needs dividends
    ///   the market context lacks (checked before anything else)
    /// - [`VolProbError::InsufficientData`] if too few quotes survive
    ///   filtering and implied vol extraction
    /// - any error of [`fit`](Self::fit)
    pub fn fit_quotes(
        &self,
        quotes: &[OptionQuote],
        market: &MarketContext,
        expiry: NaiveDate,
    ) -> error::Result<FittedVolCurve> {
        let engine = self.config.pricing_engine;
        engine.require_inputs(market)?;
        let mut ctx = market.at_expiry(expiry)?;

        let for_expiry: Vec<OptionQuote> =
            quotes.iter().filter(|q| q.expiry == expiry).cloned().collect();
        let required = self.config.required_points();
        if for_expiry.is_empty() {
            return Err(VolProbError::InsufficientData {
                message: format!("no quotes for expiry {expiry}"),
                available: 0,
                required,
            });
        }
        let (priced, report) = self
            .config
            .quote_filter()
            .apply(&for_expiry, market.valuation_date)?;

        if self.config.forward_source == ForwardSource::PutCallParity {
            match quotes::parity_forward(&priced, ctx.spot, ctx.discount) {
                Some(f) => ctx = ctx.with_forward(f)?,
                None => {
                    #[cfg(feature = "logging")]
                    tracing::debug!(%expiry, "no call/put pairs; using carry forward");
                }
            }
        }

        let mut points = Vec::new();
        let mut dropped = 0;
        for q in quotes::select_otm(&priced, ctx.forward) {
            let (strike, option_type) = (q.quote.strike, q.quote.option_type);
            match implied_vol(q.price, strike, option_type, &ctx, engine, &self.config.solver) {
                Ok(vol) => points.push(
                    ImpliedVolPoint::new(q.quote.strike, expiry, vol.0)
                        .with_weight(self.config.weighting.raw_weight(&q.quote)),
                ),
                Err(e @ (VolProbError::NoBracket { .. } | VolProbError::NonConvergence { .. })) => {
                    dropped += 1;
                    #[cfg(feature = "logging")]
                    tracing::debug!(%expiry, strike, error = %e, "implied vol dropped");
                    #[cfg(not(feature = "logging"))]
                    let _ = e;
                }
                Err(e) => return Err(e),
            }
        }

        if points.len() < required {
            return Err(VolProbError::InsufficientData {
                message: format!(
                    "expiry {expiry}: {} quotes after filtering, {} without implied vol",
                    report.kept, dropped
                ),
                available: points.len(),
                required,
            });
        }

        let mut curve = self.fit(&ctx, &points)?;
        curve.diagnostics.dropped_quotes = dropped;
        curve.diagnostics.filter = Some(report);
        Ok(curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SplineOptions;
    use approx::assert_abs_diff_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn market() -> MarketContext {
        MarketContext::new(date(2025, 3, 3), 100.0, 0.04).unwrap()
    }

    fn expiry() -> NaiveDate {
        date(2025, 6, 2)
    }

    fn skew(strike: f64) -> f64 {
        let k = (strike / 100.0_f64).ln();
        0.24 - 0.2 * k + 0.5 * k * k
    }

    fn quotes_from(vol: impl Fn(f64) -> f64) -> Vec<OptionQuote> {
        let ctx = market().at_expiry(expiry()).unwrap();
        let mut out = Vec::new();
        for i in 0..15 {
            let k = 72.0 + 4.0 * i as f64;
            for ot in [OptionType::Call, OptionType::Put] {
                let p = PricingEngine::Black76.price(&ctx, k, vol(k), ot);
                out.push(
                    OptionQuote::new(k, expiry(), ot, date(2025, 3, 3))
                        .with_bid_ask(p * 0.999, p * 1.001)
                        .with_volume(10.0 + i as f64),
                );
            }
        }
        out
    }

    #[test]
    fn fit_quotes_recovers_skew() {
        let config = FitConfig::default();
        let curve = SmileCalibrator::new(&config)
            .fit_quotes(&quotes_from(skew), &market(), expiry())
            .unwrap();
        assert_eq!(curve.expiry(), expiry());
        assert_eq!(curve.model().name(), "SVI");
        for k in [80.0, 100.0, 120.0] {
            assert_abs_diff_eq!(curve.vol(k).unwrap().0, skew(k), epsilon = 5e-3);
        }
        let d = curve.diagnostics();
        assert_eq!(d.n_points, 15);
        assert_eq!(d.filter.unwrap().kept, 30);
        assert!(d.rmse_vol < 5e-3);
    }

    #[test]
    fn spline_method_is_dispatched() {
        let method = SmileMethod::BSpline(SplineOptions::default());
        let config = FitConfig::default().with_method(method);
        let curve = SmileCalibrator::new(&config)
            .fit_quotes(&quotes_from(skew), &market(), expiry())
            .unwrap();
        assert_eq!(curve.model().name(), "BSpline");
        assert_abs_diff_eq!(curve.atm_vol(), skew(curve.forward()), epsilon = 3e-3);
    }

    #[test]
    fn parity_forward_matches_carry_on_consistent_quotes() {
        let config = FitConfig::default().with_forward_source(ForwardSource::PutCallParity);
        let curve = SmileCalibrator::new(&config)
            .fit_quotes(&quotes_from(skew), &market(), expiry())
            .unwrap();
        let carry = market().at_expiry(expiry()).unwrap().forward;
        assert_abs_diff_eq!(curve.forward(), carry, epsilon = 1e-6);
    }

    #[test]
    fn unreachable_prices_are_dropped_not_fatal() {
        let mut quotes = quotes_from(skew);
        // A call priced above the discounted forward cannot be inverted.
        quotes.push(
            OptionQuote::new(150.0, expiry(), OptionType::Call, date(2025, 3, 3)).with_last(120.0),
        );
        let config = FitConfig::default();
        let curve = SmileCalibrator::new(&config)
            .fit_quotes(&quotes, &market(), expiry())
            .unwrap();
        assert_eq!(curve.diagnostics().dropped_quotes, 1);
    }

    #[test]
    fn too_few_strikes_is_insufficient_data() {
        let quotes: Vec<_> = quotes_from(skew).into_iter().take(6).collect();
        let config = FitConfig::default();
        let r = SmileCalibrator::new(&config).fit_quotes(&quotes, &market(), expiry());
        assert!(matches!(
            r,
            Err(VolProbError::InsufficientData { available: 3, required: 5, .. })
        ));
    }

    #[test]
    fn spot_engine_without_dividends_fails_first() {
        let config = FitConfig::default().with_pricing_engine(PricingEngine::BlackScholes);
        let r = SmileCalibrator::new(&config).fit_quotes(&[], &market(), expiry());
        assert!(matches!(r, Err(VolProbError::MissingDividendInfo { .. })));
    }

    #[test]
    fn fit_rejects_points_from_other_expiries() {
        let ctx = market().at_expiry(expiry()).unwrap();
        let points: Vec<_> = (0..6)
            .map(|i| ImpliedVolPoint::new(90.0 + 5.0 * i as f64, date(2025, 9, 1), 0.2))
            .collect();
        let config = FitConfig::default();
        let r = SmileCalibrator::new(&config).fit(&ctx, &points);
        assert!(matches!(r, Err(VolProbError::InvalidInput { .. })));
    }

    #[test]
    fn point_weights_change_the_fit() {
        let ctx = market().at_expiry(expiry()).unwrap();
        let mut points: Vec<_> = (0..11)
            .map(|i| {
                let k = 80.0 + 4.0 * i as f64;
                ImpliedVolPoint::new(k, expiry(), skew(k))
            })
            .collect();
        points[5].implied_vol += 0.03;
        let config = FitConfig::default();
        let cal = SmileCalibrator::new(&config);
        let plain = cal.fit(&ctx, &points).unwrap();
        points[5].weight = 40.0;
        let heavy = cal.fit(&ctx, &points).unwrap();
        let target = points[5].implied_vol;
        let err = |c: &FittedVolCurve| (c.vol(points[5].strike).unwrap().0 - target).abs();
        assert!(err(&heavy) < err(&plain));
    }

    #[test]
    fn curve_prices_with_its_engine() {
        let config = FitConfig::default();
        let curve = SmileCalibrator::new(&config)
            .fit_quotes(&quotes_from(|_| 0.3), &market(), expiry())
            .unwrap();
        let ctx = curve.context();
        let vol = curve.vol(105.0).unwrap().0;
        let expected = PricingEngine::Black76.price(ctx, 105.0, vol, OptionType::Call);
        assert_abs_diff_eq!(curve.call_price(105.0).unwrap(), expected, epsilon = 1e-12);
    }
}
