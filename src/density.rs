//! Risk-neutral density extraction (Breeden-Litzenberger).
//!
//! Call prices are regenerated from a fitted curve on a uniform strike grid
//! and differentiated twice:
//!
//! ```text
//! q(K) = e^{rT} · ∂²C/∂K² ≈ e^{rT} · (C(K−h) − 2C(K) + C(K+h)) / h²
//! ```
//!
//! Small negative values from discretization are clipped and the result is
//! renormalized; if the negative share of the mass is too large the fit is
//! rejected instead.
//!
//! # References
//! - Breeden, D.T. & Litzenberger, R.H. "Prices of State-Contingent Claims
//!   Implicit in Option Prices" (1978)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::distribution::{DensityDiagnostics, Distribution, DistributionSurface};
use crate::error::{self, VolProbError};
use crate::market::MarketContext;
use crate::smile::FittedVolCurve;
use crate::surface::FittedVolSurface;
use crate::validate::validate_positive;

/// Treatment of the two grid end points, where a central difference is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Drop the end points.
    #[default]
    Trim,
    /// Use one-sided second differences at the end points.
    OneSided,
}

/// Strike grid and quality limits for density extraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    /// Lowest strike as a multiple of the underlying price.
    pub lower_multiple: f64,
    /// Highest strike as a multiple of the underlying price.
    pub upper_multiple: f64,
    /// Fixed strike spacing; derived from `noise_level` when absent.
    pub step: Option<f64>,
    /// Relative pricing noise; the default step is `S·noise^{1/4}`.
    pub noise_level: f64,
    /// Cap on grid size; the step widens to respect it.
    pub max_points: usize,
    pub boundary: Boundary,
    /// Largest tolerated share of negative mass before clipping.
    pub max_negative_mass: f64,
    /// Tolerance on the CDF end points of the result.
    pub cdf_tolerance: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            lower_multiple: 0.05,
            upper_multiple: 4.0,
            step: None,
            noise_level: 1e-10,
            max_points: 20_000,
            boundary: Boundary::Trim,
            max_negative_mass: 0.05,
            cdf_tolerance: 1e-6,
        }
    }
}

impl GridSpec {
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_bounds(mut self, lower_multiple: f64, upper_multiple: f64) -> Self {
        self.lower_multiple = lower_multiple;
        self.upper_multiple = upper_multiple;
        self
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_max_negative_mass(mut self, fraction: f64) -> Self {
        self.max_negative_mass = fraction;
        self
    }

    fn validate(&self) -> error::Result<()> {
        validate_positive(self.lower_multiple, "grid lower multiple")?;
        validate_positive(self.upper_multiple, "grid upper multiple")?;
        validate_positive(self.noise_level, "noise level")?;
        validate_positive(self.cdf_tolerance, "cdf tolerance")?;
        if let Some(h) = self.step {
            validate_positive(h, "grid step")?;
        }
        if self.upper_multiple <= self.lower_multiple {
            return Err(VolProbError::InvalidInput {
                message: format!(
                    "grid upper multiple {} must exceed lower multiple {}",
                    self.upper_multiple, self.lower_multiple
                ),
            });
        }
        if self.max_points < 5 {
            return Err(VolProbError::InvalidInput {
                message: format!("grid needs at least 5 points, got {}", self.max_points),
            });
        }
        if !(0.0..=1.0).contains(&self.max_negative_mass) {
            return Err(VolProbError::InvalidInput {
                message: format!(
                    "max negative mass must lie in [0, 1], got {}",
                    self.max_negative_mass
                ),
            });
        }
        Ok(())
    }

    /// Strike grid for an underlying price.
    pub fn strikes(&self, underlying: f64) -> error::Result<Vec<f64>> {
        self.validate()?;
        validate_positive(underlying, "underlying price")?;
        let lo = underlying * self.lower_multiple;
        let hi = underlying * self.upper_multiple;
        let mut h = self
            .step
            .unwrap_or_else(|| underlying * self.noise_level.powf(0.25));
        if (hi - lo) / h + 1.0 > self.max_points as f64 {
            h = (hi - lo) / (self.max_points - 1) as f64;
        }
        let n = ((hi - lo) / h).floor() as usize + 1;
        if n < 5 {
            return Err(VolProbError::InvalidInput {
                message: format!("grid step {h} leaves only {n} strikes in [{lo}, {hi}]"),
            });
        }
        Ok((0..n).map(|i| lo + h * i as f64).collect())
    }
}

/// Turns fitted curves into [`Distribution`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityExtractor;

impl DensityExtractor {
    /// Density of the underlying at the curve's expiry.
    ///
    /// # Errors
    /// - [`VolProbError::InvalidInput`] for an invalid grid
    /// - [`VolProbError::NumericalError`] if the curve cannot be priced on
    ///   the grid or the density has no mass
    /// - [`VolProbError::DensityQuality`] if the negative share of the raw
    ///   density exceeds `grid.max_negative_mass`
    pub fn derive(
        curve: &FittedVolCurve,
        market: &MarketContext,
        grid: &GridSpec,
    ) -> error::Result<Distribution> {
        let strikes = grid.strikes(market.underlying_price)?;
        let h = strikes[1] - strikes[0];
        let calls = strikes
            .iter()
            .map(|&k| {
                curve.call_price(k).map_err(|e| VolProbError::NumericalError {
                    message: format!("expiry {}: cannot price strike {k}: {e}", curve.expiry()),
                })
            })
            .collect::<error::Result<Vec<f64>>>()?;

        let growth = 1.0 / curve.context().discount;
        let n = strikes.len();
        let second = |i: usize| (calls[i - 1] - 2.0 * calls[i] + calls[i + 1]) / (h * h) * growth;
        let (prices, raw): (Vec<f64>, Vec<f64>) = match grid.boundary {
            Boundary::Trim => (strikes[1..n - 1].to_vec(), (1..n - 1).map(second).collect()),
            Boundary::OneSided => {
                let mut raw = Vec::with_capacity(n);
                raw.push((calls[0] - 2.0 * calls[1] + calls[2]) / (h * h) * growth);
                raw.extend((1..n - 1).map(second));
                raw.push((calls[n - 3] - 2.0 * calls[n - 2] + calls[n - 1]) / (h * h) * growth);
                (strikes.clone(), raw)
            }
        };

        let positive: f64 = raw.iter().map(|d| d.max(0.0)).sum::<f64>() * h;
        let negative: f64 = raw.iter().map(|d| (-d).max(0.0)).sum::<f64>() * h;
        let total = positive + negative;
        if !(total.is_finite() && total > 0.0) {
            return Err(VolProbError::NumericalError {
                message: format!("expiry {}: density has no mass on the grid", curve.expiry()),
            });
        }
        let negative_mass_fraction = negative / total;
        if negative_mass_fraction > grid.max_negative_mass {
            let worst = raw
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map_or(prices[0], |(i, _)| prices[i]);
            return Err(VolProbError::DensityQuality {
                negative_mass_fraction,
                limit: grid.max_negative_mass,
                worst_price: worst,
            });
        }

        let clipped_points = raw.iter().filter(|d| **d < 0.0).count();
        let pdf: Vec<f64> = raw.into_iter().map(|d| d.max(0.0)).collect();
        let raw_mass = pdf
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]) * h)
            .sum::<f64>();

        #[cfg(feature = "logging")]
        tracing::debug!(
            expiry = %curve.expiry(),
            step = h,
            n_points = prices.len(),
            raw_mass,
            negative_mass_fraction,
            clipped_points,
            "density extracted"
        );

        let diagnostics = DensityDiagnostics {
            step: h,
            n_points: prices.len(),
            raw_mass,
            negative_mass_fraction,
            clipped_points,
        };
        Ok(Distribution::from_unnormalized_pdf(prices, pdf, grid.cdf_tolerance)?
            .with_diagnostics(diagnostics))
    }

    /// Densities for every curve of a surface; failures are recorded per expiry.
    pub fn derive_surface(
        surface: &FittedVolSurface,
        market: &MarketContext,
        grid: &GridSpec,
    ) -> DistributionSurface {
        let curves: Vec<&FittedVolCurve> = surface.curves().values().collect();
        let derive = |c: &&FittedVolCurve| (c.expiry(), Self::derive(c, market, grid));

        #[cfg(feature = "parallel")]
        let results: Vec<_> = curves.par_iter().map(derive).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = curves.iter().map(derive).collect();

        let mut slices = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (expiry, result) in results {
            match result {
                Ok(d) => {
                    slices.insert(expiry, d);
                }
                Err(e) => {
                    #[cfg(feature = "logging")]
                    tracing::warn!(%expiry, error = %e, "density extraction failed");
                    failures.insert(expiry, e);
                }
            }
        }
        DistributionSurface::new(slices).with_failures(failures)
    }
}
