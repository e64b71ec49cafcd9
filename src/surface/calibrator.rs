//! Calibrates every expiry of a quote set.

use std::collections::BTreeMap;

use chrono::NaiveDate;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::FitConfig;
use crate::error::{self, VolProbError};
use crate::market::MarketContext;
use crate::quotes::OptionQuote;
use crate::smile::{FittedVolCurve, SmileCalibrator};
use crate::surface::{FittedVolSurface, calendar_violations};

/// Fits one smile per expiry with shared configuration.
///
/// Expiries are independent; with the `parallel` feature they are fitted
/// concurrently. Results do not depend on thread scheduling.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use volprob::config::FitConfig;
/// use volprob::market::MarketContext;
/// use volprob::pricing::PricingEngine;
/// use volprob::quotes::OptionQuote;
/// use volprob::surface::SurfaceCalibrator;
/// use volprob::types::OptionType;
///
/// let val = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
/// let market = MarketContext::new(val, 100.0, 0.03)?;
/// let mut quotes = Vec::new();
/// let expiries = [(2025, 3, 21), (2025, 6, 20)]
///     .map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap());
/// for expiry in expiries {
///     let ctx = market.at_expiry(expiry)?;
///     for i in 0..9 {
///         let k = 80.0 + 5.0 * i as f64;
///         let p = PricingEngine::Black76.price(&ctx, k, 0.2, OptionType::Call);
///         quotes.push(OptionQuote::new(k, expiry, OptionType::Call, val).with_last(p));
///     }
/// }
/// let surface = SurfaceCalibrator::new(FitConfig::default()).fit(&quotes, &market)?;
/// assert_eq!(surface.len(), 2);
/// assert!(surface.calendar_violations().is_empty());
/// # Ok::<(), volprob::VolProbError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct SurfaceCalibrator {
    config: FitConfig,
}

impl SurfaceCalibrator {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fit every expiry present in `quotes`.
    ///
    /// Per-expiry failures are recorded in the surface, not returned.
    ///
    /// # Errors
    /// - [`VolProbError::MissingDividendInfo`] if the engine needs dividends
    ///   the market context lacks
    /// - [`VolProbError::InsufficientData`] if `quotes` is empty
    pub fn fit(
        &self,
        quotes: &[OptionQuote],
        market: &MarketContext,
    ) -> error::Result<FittedVolSurface> {
        self.config.pricing_engine.require_inputs(market)?;
        if quotes.is_empty() {
            return Err(VolProbError::InsufficientData {
                message: "no quotes supplied".into(),
                available: 0,
                required: self.config.required_points(),
            });
        }

        let mut by_expiry: BTreeMap<NaiveDate, Vec<OptionQuote>> = BTreeMap::new();
        for q in quotes {
            by_expiry.entry(q.expiry).or_default().push(q.clone());
        }

        #[cfg(feature = "logging")]
        tracing::debug!(
            n_expiries = by_expiry.len(),
            n_quotes = quotes.len(),
            model = self.config.method.name(),
            "surface calibration started"
        );

        let calibrator = SmileCalibrator::new(&self.config);
        let fit_expiry = |(expiry, group): (&NaiveDate, &Vec<OptionQuote>)| {
            (*expiry, calibrator.fit_quotes(group, market, *expiry))
        };
        let groups: Vec<(&NaiveDate, &Vec<OptionQuote>)> = by_expiry.iter().collect();

        #[cfg(feature = "parallel")]
        let results: Vec<(NaiveDate, error::Result<FittedVolCurve>)> =
            groups.into_par_iter().map(fit_expiry).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<(NaiveDate, error::Result<FittedVolCurve>)> =
            groups.into_iter().map(fit_expiry).collect();

        let mut curves = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (expiry, result) in results {
            match result {
                Ok(curve) => {
                    curves.insert(expiry, curve);
                }
                Err(e) => {
                    #[cfg(feature = "logging")]
                    tracing::warn!(%expiry, error = %e, "expiry calibration failed");
                    failures.insert(expiry, e);
                }
            }
        }

        let violations = if self.config.check_calendar {
            let fitted: Vec<&FittedVolCurve> = curves.values().collect();
            calendar_violations(&fitted)?
        } else {
            Vec::new()
        };

        #[cfg(feature = "logging")]
        tracing::debug!(
            fitted = curves.len(),
            failed = failures.len(),
            calendar_violations = violations.len(),
            "surface calibration complete"
        );

        Ok(FittedVolSurface::new(curves, failures, violations))
    }
}
