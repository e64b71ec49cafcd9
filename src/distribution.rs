//! Risk-neutral price distributions and probability queries.
//!
//! A [`Distribution`] is a density and cumulative distribution tabulated on
//! a strictly increasing price grid. Values between grid points are linearly
//! interpolated; integrals use the trapezoidal rule.
//!
//! ```
//! use volprob::distribution::Distribution;
//!
//! let prices = vec![0.0, 1.0, 2.0];
//! let pdf = vec![0.0, 1.0, 0.0];
//! let cdf = vec![0.0, 0.5, 1.0];
//! let d = Distribution::new(prices, pdf, cdf)?;
//! assert!((d.prob_below(1.0) - 0.5).abs() < 1e-12);
//! assert!((d.expected_value() - 1.0).abs() < 1e-12);
//! # Ok::<(), volprob::VolProbError>(())
//! ```

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{self, VolProbError};

/// Default tolerance on the CDF end points and total mass.
pub const DEFAULT_CDF_TOLERANCE: f64 = 1e-6;

/// Summary of how a density was obtained from call prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityDiagnostics {
    /// Strike spacing of the finite-difference grid.
    pub step: f64,
    /// Grid points in the resulting distribution.
    pub n_points: usize,
    /// Mass of the clipped density before renormalization.
    pub raw_mass: f64,
    /// Share of absolute mass that was negative before clipping.
    pub negative_mass_fraction: f64,
    /// Grid points set to zero by clipping.
    pub clipped_points: usize,
}

/// Tabulated risk-neutral distribution of the underlying at one expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DistributionRaw", into = "DistributionRaw")]
pub struct Distribution {
    prices: Vec<f64>,
    pdf: Vec<f64>,
    cdf: Vec<f64>,
    diagnostics: Option<DensityDiagnostics>,
}

#[derive(Serialize, Deserialize)]
struct DistributionRaw {
    prices: Vec<f64>,
    pdf: Vec<f64>,
    cdf: Vec<f64>,
    #[serde(default)]
    diagnostics: Option<DensityDiagnostics>,
}

impl TryFrom<DistributionRaw> for Distribution {
    type Error = VolProbError;
    fn try_from(raw: DistributionRaw) -> Result<Self, Self::Error> {
        let mut d = Self::new(raw.prices, raw.pdf, raw.cdf)?;
        d.diagnostics = raw.diagnostics;
        Ok(d)
    }
}

impl From<Distribution> for DistributionRaw {
    fn from(d: Distribution) -> Self {
        Self {
            prices: d.prices,
            pdf: d.pdf,
            cdf: d.cdf,
            diagnostics: d.diagnostics,
        }
    }
}

fn invalid(message: impl Into<String>) -> VolProbError {
    VolProbError::InvalidInput {
        message: message.into(),
    }
}

/// Cumulative trapezoid integral of `y` over `x`, starting at zero.
fn cumulative_trapezoid(x: &[f64], y: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    let mut acc = 0.0;
    out.push(0.0);
    for i in 1..x.len() {
        acc += 0.5 * (y[i] + y[i - 1]) * (x[i] - x[i - 1]);
        out.push(acc);
    }
    out
}

fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (ys[0] + ys[1]) * (xs[1] - xs[0]))
        .sum()
}

/// Linear interpolation of `y(x)` at `at` for `x[0] ≤ at ≤ x[n−1]`.
fn interpolate(x: &[f64], y: &[f64], at: f64) -> f64 {
    let i = x.partition_point(|&p| p <= at).clamp(1, x.len() - 1);
    let (x0, x1) = (x[i - 1], x[i]);
    let t = (at - x0) / (x1 - x0);
    y[i - 1] + t * (y[i] - y[i - 1])
}

impl Distribution {
    /// Build a distribution, checking every invariant.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] unless:
    /// - all three vectors have the same length of at least 2
    /// - prices are finite and strictly increasing
    /// - the pdf is finite and non-negative and integrates to 1
    /// - the cdf is non-decreasing in `[0, 1]` and runs from 0 to 1
    ///
    /// within [`DEFAULT_CDF_TOLERANCE`].
    pub fn new(prices: Vec<f64>, pdf: Vec<f64>, cdf: Vec<f64>) -> error::Result<Self> {
        Self::with_tolerance(prices, pdf, cdf, DEFAULT_CDF_TOLERANCE)
    }

    /// [`new`](Self::new) with an explicit tolerance.
    pub fn with_tolerance(
        prices: Vec<f64>,
        pdf: Vec<f64>,
        cdf: Vec<f64>,
        tolerance: f64,
    ) -> error::Result<Self> {
        let n = prices.len();
        if n < 2 || pdf.len() != n || cdf.len() != n {
            return Err(invalid(format!(
                "prices, pdf and cdf need equal lengths of at least 2, got {}, {} and {}",
                n,
                pdf.len(),
                cdf.len()
            )));
        }
        if prices.iter().any(|p| !p.is_finite()) || prices.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid("prices must be finite and strictly increasing"));
        }
        if let Some(i) = pdf.iter().position(|d| !d.is_finite() || *d < 0.0) {
            return Err(invalid(format!("pdf is {} at price {}", pdf[i], prices[i])));
        }
        if cdf.iter().any(|c| !c.is_finite() || *c < 0.0 || *c > 1.0) {
            return Err(invalid("cdf values must lie in [0, 1]"));
        }
        if let Some(i) = cdf.windows(2).position(|w| w[1] < w[0]) {
            return Err(invalid(format!("cdf decreases after price {}", prices[i])));
        }
        let (first, last) = (cdf[0], cdf[n - 1]);
        if first > tolerance || last < 1.0 - tolerance {
            return Err(invalid(format!("cdf must run from 0 to 1, got {first} to {last}")));
        }
        let mass = trapezoid(&prices, &pdf);
        if (mass - 1.0).abs() > tolerance {
            return Err(invalid(format!("pdf integrates to {mass}, expected 1")));
        }
        Ok(Self {
            prices,
            pdf,
            cdf,
            diagnostics: None,
        })
    }

    /// Normalize a non-negative density on `prices` and build its cdf.
    pub(crate) fn from_unnormalized_pdf(
        prices: Vec<f64>,
        pdf: Vec<f64>,
        tolerance: f64,
    ) -> error::Result<Self> {
        let mass = trapezoid(&prices, &pdf);
        if !(mass.is_finite() && mass > 0.0) {
            return Err(VolProbError::NumericalError {
                message: format!("density has no mass to normalize (integral {mass})"),
            });
        }
        let pdf: Vec<f64> = pdf.into_iter().map(|d| d / mass).collect();
        let mut cdf = cumulative_trapezoid(&prices, &pdf);
        let total = cdf[cdf.len() - 1];
        let mut running: f64 = 0.0;
        for c in &mut cdf {
            running = running.max((*c / total).clamp(0.0, 1.0));
            *c = running;
        }
        let last = cdf.len() - 1;
        cdf[last] = 1.0;
        Self::with_tolerance(prices, pdf, cdf, tolerance)
    }

    pub(crate) fn with_diagnostics(mut self, diagnostics: DensityDiagnostics) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn pdf(&self) -> &[f64] {
        &self.pdf
    }

    pub fn cdf(&self) -> &[f64] {
        &self.cdf
    }

    /// Extraction diagnostics, when the distribution came from a fitted curve.
    pub fn diagnostics(&self) -> Option<&DensityDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Grid bounds `(min, max)`.
    pub fn support(&self) -> (f64, f64) {
        (self.prices[0], self.prices[self.prices.len() - 1])
    }

    /// P(S ≤ x). Zero below the grid, one above it.
    ///
    /// A NaN `x` gives NaN, as does [`prob_above`](Self::prob_above);
    /// [`prob_between`](Self::prob_between) rejects it instead.
    pub fn prob_below(&self, x: f64) -> f64 {
        let (lo, hi) = self.support();
        if x.is_nan() {
            f64::NAN
        } else if x < lo {
            0.0
        } else if x >= hi {
            1.0
        } else {
            interpolate(&self.prices, &self.cdf, x).clamp(0.0, 1.0)
        }
    }

    /// P(S > x) = 1 − P(S ≤ x).
    pub fn prob_above(&self, x: f64) -> f64 {
        1.0 - self.prob_below(x)
    }

    /// P(lo < S ≤ hi).
    ///
    /// # Errors
    /// - [`VolProbError::InvalidRange`] if `lo > hi`
    /// - [`VolProbError::InvalidInput`] if either bound is NaN
    pub fn prob_between(&self, lo: f64, hi: f64) -> error::Result<f64> {
        if lo.is_nan() || hi.is_nan() {
            return Err(invalid("range bounds must not be NaN"));
        }
        if lo > hi {
            return Err(VolProbError::InvalidRange { lo, hi });
        }
        Ok((self.prob_below(hi) - self.prob_below(lo)).max(0.0))
    }

    /// Density at `x`; zero outside the grid.
    pub fn pdf_at(&self, x: f64) -> f64 {
        let (lo, hi) = self.support();
        if !(lo..=hi).contains(&x) {
            return 0.0;
        }
        interpolate(&self.prices, &self.pdf, x)
    }

    /// E\[S\] by trapezoidal integration of `x·pdf(x)`.
    pub fn expected_value(&self) -> f64 {
        let xf: Vec<f64> = self.prices.iter().zip(&self.pdf).map(|(x, f)| x * f).collect();
        trapezoid(&self.prices, &xf)
    }

    /// Var\[S\] by trapezoidal integration of `(x − mean)²·pdf(x)`.
    pub fn variance(&self) -> f64 {
        let mean = self.expected_value();
        let sq: Vec<f64> = self
            .prices
            .iter()
            .zip(&self.pdf)
            .map(|(x, f)| (x - mean).powi(2) * f)
            .collect();
        trapezoid(&self.prices, &sq).max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Smallest price whose cdf reaches `p`, linearly interpolated.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] unless `0 ≤ p ≤ 1`.
    pub fn quantile(&self, p: f64) -> error::Result<f64> {
        if !(0.0..=1.0).contains(&p) {
            return Err(invalid(format!("quantile level must lie in [0, 1], got {p}")));
        }
        let i = self.cdf.partition_point(|&c| c < p);
        if i == 0 {
            return Ok(self.prices[0]);
        }
        if i == self.cdf.len() {
            return Ok(self.prices[i - 1]);
        }
        let (c0, c1) = (self.cdf[i - 1], self.cdf[i]);
        let t = if c1 > c0 { (p - c0) / (c1 - c0) } else { 0.0 };
        Ok(self.prices[i - 1] + t * (self.prices[i] - self.prices[i - 1]))
    }
}

/// Distributions for several expiries.
#[derive(Debug, Default)]
pub struct DistributionSurface {
    slices: BTreeMap<NaiveDate, Distribution>,
    failures: BTreeMap<NaiveDate, VolProbError>,
}

impl DistributionSurface {
    pub fn new(slices: BTreeMap<NaiveDate, Distribution>) -> Self {
        Self {
            slices,
            failures: BTreeMap::new(),
        }
    }

    pub(crate) fn with_failures(mut self, failures: BTreeMap<NaiveDate, VolProbError>) -> Self {
        self.failures = failures;
        self
    }

    /// Distribution at exactly `expiry`.
    ///
    /// # Errors
    /// Returns [`VolProbError::ExpiryNotFound`] if there is no such slice.
    pub fn slice(&self, expiry: NaiveDate) -> error::Result<&Distribution> {
        self.slices
            .get(&expiry)
            .ok_or(VolProbError::ExpiryNotFound { expiry })
    }

    /// Distribution at `expiry`, blending the neighbouring slices.
    ///
    /// Between two slices the result is the mixture of their densities,
    /// weighted linearly in calendar days, on the union of both grids.
    /// An exact match returns a copy of that slice.
    ///
    /// # Errors
    /// Returns [`VolProbError::ExpiryNotFound`] if `expiry` lies outside the
    /// range of available slices.
    pub fn interpolate(&self, expiry: NaiveDate) -> error::Result<Distribution> {
        if let Some(d) = self.slices.get(&expiry) {
            return Ok(d.clone());
        }
        let before = self.slices.range(..expiry).next_back();
        let after = self.slices.range(expiry..).next();
        let (Some((&d0, lo)), Some((&d1, hi))) = (before, after) else {
            return Err(VolProbError::ExpiryNotFound { expiry });
        };
        let alpha = (expiry - d0).num_days() as f64 / (d1 - d0).num_days() as f64;

        let mut grid: Vec<f64> = lo.prices.iter().chain(&hi.prices).copied().collect();
        grid.sort_by(f64::total_cmp);
        grid.dedup();
        let pdf: Vec<f64> = grid
            .iter()
            .map(|&x| (1.0 - alpha) * lo.pdf_at(x) + alpha * hi.pdf_at(x))
            .collect();
        Distribution::from_unnormalized_pdf(grid, pdf, DEFAULT_CDF_TOLERANCE)
    }

    /// Available expiries in ascending order.
    pub fn expiries(&self) -> Vec<NaiveDate> {
        self.slices.keys().copied().collect()
    }

    pub fn slices(&self) -> &BTreeMap<NaiveDate, Distribution> {
        &self.slices
    }

    /// Expiries whose density extraction failed.
    pub fn failures(&self) -> &BTreeMap<NaiveDate, VolProbError> {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}
