//! Fit configuration passed explicitly into every entry point.
//!
//! There is no process-wide default state: two runs with equal
//! [`FitConfig`]s on equal inputs produce equal outputs.
//!
//! ```
//! use volprob::config::{FitConfig, SmileMethod, SplineOptions};
//! use volprob::implied::SolverMethod;
//! use volprob::quotes::PriceMethod;
//!
//! let config = FitConfig::default()
//!     .with_method(SmileMethod::BSpline(SplineOptions::default()))
//!     .with_solver_method(SolverMethod::DerivativeBased)
//!     .with_price_method(PriceMethod::Last)
//!     .with_max_staleness_days(3);
//! assert_eq!(config.max_staleness_days, Some(3));
//! ```

use serde::{Deserialize, Serialize};

use crate::implied::{SolverConfig, SolverMethod};
use crate::pricing::PricingEngine;
use crate::quotes::{PriceMethod, QuoteFilter, WeightingScheme};

/// Tuning for SVI calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SviOptions {
    /// Seed for the random restart points.
    pub random_seed: u64,
    /// Number of optimizer starts (best grid point plus random restarts).
    pub n_starts: usize,
    /// Iteration cap per optimizer start.
    pub max_iter: usize,
    /// Objective-spread convergence threshold.
    pub tolerance: f64,
    /// Upper bound of the σ search; `None` derives it from the strike range.
    pub max_sigma: Option<f64>,
}

impl Default for SviOptions {
    fn default() -> Self {
        Self {
            random_seed: 42,
            n_starts: 4,
            max_iter: 400,
            tolerance: 1e-14,
            max_sigma: None,
        }
    }
}

/// Tuning for the penalized B-spline smile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplineOptions {
    /// Polynomial degree of the B-spline basis (1 to 5).
    pub degree: usize,
    /// Roughness penalty weight relative to the data term; 0 is plain least squares.
    pub smoothing: f64,
    /// Number of knot intervals; defaults to `points − degree`, capped at 30.
    pub segments: Option<usize>,
    /// Clamp extrapolated wings so total variance never falls moving away from the data.
    pub monotone_wings: bool,
}

impl Default for SplineOptions {
    fn default() -> Self {
        Self {
            degree: 3,
            smoothing: 1e-3,
            segments: None,
            monotone_wings: true,
        }
    }
}

/// Smile fitting algorithm with its options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method", content = "options")]
pub enum SmileMethod {
    /// Five-parameter raw SVI.
    Svi(SviOptions),
    /// Penalized B-spline on total variance.
    BSpline(SplineOptions),
}

impl Default for SmileMethod {
    fn default() -> Self {
        SmileMethod::Svi(SviOptions::default())
    }
}

impl SmileMethod {
    /// Model name used in diagnostics and errors.
    pub fn name(&self) -> &'static str {
        match self {
            SmileMethod::Svi(_) => "SVI",
            SmileMethod::BSpline(_) => "BSpline",
        }
    }

    /// Fewest distinct strikes the model can be fitted to.
    pub fn min_points(&self) -> usize {
        match self {
            SmileMethod::Svi(_) => 5,
            SmileMethod::BSpline(opts) => opts.degree + 1,
        }
    }
}

/// Where the per-expiry forward comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardSource {
    /// Spot, rate and dividends: `F = (S − PV(div))·e^{(r−q)T}`.
    #[default]
    Carry,
    /// Put-call parity on strikes quoted on both sides; falls back to carry.
    PutCallParity,
}

/// Complete configuration of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub method: SmileMethod,
    pub solver: SolverConfig,
    pub pricing_engine: PricingEngine,
    pub price_method: PriceMethod,
    pub max_staleness_days: Option<u32>,
    pub weighting: WeightingScheme,
    pub forward_source: ForwardSource,
    /// Minimum distinct strikes per expiry, on top of the model's own minimum.
    pub min_points: usize,
    /// Scan fitted surfaces for calendar arbitrage.
    pub check_calendar: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            method: SmileMethod::default(),
            solver: SolverConfig::default(),
            pricing_engine: PricingEngine::default(),
            price_method: PriceMethod::default(),
            max_staleness_days: None,
            weighting: WeightingScheme::default(),
            forward_source: ForwardSource::default(),
            min_points: 5,
            check_calendar: true,
        }
    }
}

impl FitConfig {
    pub fn with_method(mut self, method: SmileMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_solver_method(mut self, method: SolverMethod) -> Self {
        self.solver.method = method;
        self
    }

    pub fn with_pricing_engine(mut self, engine: PricingEngine) -> Self {
        self.pricing_engine = engine;
        self
    }

    pub fn with_price_method(mut self, price_method: PriceMethod) -> Self {
        self.price_method = price_method;
        self
    }

    pub fn with_max_staleness_days(mut self, days: u32) -> Self {
        self.max_staleness_days = Some(days);
        self
    }

    pub fn with_weighting(mut self, weighting: WeightingScheme) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_forward_source(mut self, source: ForwardSource) -> Self {
        self.forward_source = source;
        self
    }

    pub fn with_min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    pub fn with_calendar_check(mut self, check: bool) -> Self {
        self.check_calendar = check;
        self
    }

    /// Distinct strikes required per expiry.
    pub fn required_points(&self) -> usize {
        self.min_points.max(self.method.min_points())
    }

    /// The quote filter described by this configuration.
    pub fn quote_filter(&self) -> QuoteFilter {
        QuoteFilter::new(self.price_method, self.max_staleness_days)
    }
}
