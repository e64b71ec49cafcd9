//! Penalized B-spline smile on total variance.
//!
//! A non-parametric smile: total variance `w(k)` is a B-spline of degree
//! `p` on uniform knots spanning the observed log-moneyness range, fitted by
//! weighted least squares with a second-difference roughness penalty on the
//! coefficients (Eilers & Marx P-splines). Outside the data range the smile
//! continues linearly, optionally with wings that never slope back down.
//!
//! # References
//! - Eilers, P.H.C. & Marx, B.D. "Flexible Smoothing with B-splines and
//!   Penalties" (1996)
//! - de Boor, C. "A Practical Guide to Splines" (1978)

use serde::{Deserialize, Serialize};

use nalgebra::{DMatrix, DVector};

use crate::config::SplineOptions;
use crate::error::{self, VolProbError};
use crate::smile::SmileSection;
use crate::smile::arbitrage::{self, ArbitrageReport, numeric_density};
use crate::types::Variance;
use crate::validate::validate_positive;

const MAX_DEGREE: usize = 5;
const MAX_SEGMENTS: usize = 30;

/// B-spline smile on total variance.
///
/// # Construction
///
/// ```
/// use volprob::config::SplineOptions;
/// use volprob::smile::{SmileSection, SplineSmile};
///
/// let data: Vec<(f64, f64, f64)> = [80.0, 90.0, 100.0, 110.0, 120.0, 130.0]
///     .iter()
///     .map(|&k| (k, 0.2 + 0.3 * (k / 100.0_f64).ln().powi(2), 1.0))
///     .collect();
/// let fit = SplineSmile::calibrate(100.0, 1.0, &data, &SplineOptions::default())?;
/// assert!((fit.smile.vol(100.0)?.0 - 0.2).abs() < 5e-3);
/// # Ok::<(), volprob::VolProbError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SplineSmileRaw", into = "SplineSmileRaw")]
pub struct SplineSmile {
    forward: f64,
    expiry: f64,
    degree: usize,
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    monotone_wings: bool,
    left_slope: f64,
    right_slope: f64,
}

#[derive(Serialize, Deserialize)]
struct SplineSmileRaw {
    forward: f64,
    expiry: f64,
    degree: usize,
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    monotone_wings: bool,
}

impl TryFrom<SplineSmileRaw> for SplineSmile {
    type Error = VolProbError;
    fn try_from(raw: SplineSmileRaw) -> Result<Self, Self::Error> {
        Self::new(
            raw.forward,
            raw.expiry,
            raw.degree,
            raw.knots,
            raw.coefficients,
            raw.monotone_wings,
        )
    }
}

impl From<SplineSmile> for SplineSmileRaw {
    fn from(s: SplineSmile) -> Self {
        Self {
            forward: s.forward,
            expiry: s.expiry,
            degree: s.degree,
            knots: s.knots,
            coefficients: s.coefficients,
            monotone_wings: s.monotone_wings,
        }
    }
}

/// Outcome of [`SplineSmile::calibrate`].
#[derive(Debug, Clone)]
pub struct SplineCalibration {
    pub smile: SplineSmile,
    /// Weighted residual sum of squares in total variance.
    pub rss: f64,
    /// Penalty weight after scaling to the data term.
    pub effective_smoothing: f64,
}

/// Index `s` with `knots[s] ≤ x < knots[s + 1]`, clamped to the spline domain.
fn find_span(knots: &[f64], degree: usize, n_coef: usize, x: f64) -> usize {
    let upper = n_coef - 1;
    if x >= knots[n_coef] {
        return upper;
    }
    let pos = knots[degree..=upper].partition_point(|&t| t <= x);
    (degree + pos).saturating_sub(1).clamp(degree, upper)
}

/// The `degree + 1` non-zero basis functions at `x` (Cox-de Boor recursion).
fn basis_functions(knots: &[f64], degree: usize, span: usize, x: f64) -> Vec<f64> {
    let mut n = vec![0.0; degree + 1];
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];
    n[0] = 1.0;
    for j in 1..=degree {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom == 0.0 { 0.0 } else { n[r] / denom };
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }
    n
}

fn calibration_error(message: impl Into<String>) -> VolProbError {
    VolProbError::CalibrationError {
        message: message.into(),
        model: "BSpline",
        rms_error: None,
    }
}

impl SplineSmile {
    /// Create a spline smile from a knot vector and coefficients.
    ///
    /// The spline lives on `[knots[degree], knots[coefficients.len()]]` and is
    /// extended linearly beyond it.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] for a degree outside 1 to 5,
    /// a knot vector whose length is not `coefficients + degree + 1`,
    /// decreasing or non-finite knots, an empty domain, or non-finite
    /// coefficients.
    pub fn new(
        forward: f64,
        expiry: f64,
        degree: usize,
        knots: Vec<f64>,
        coefficients: Vec<f64>,
        monotone_wings: bool,
    ) -> error::Result<Self> {
        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        if degree == 0 || degree > MAX_DEGREE {
            return Err(VolProbError::InvalidInput {
                message: format!("spline degree must be between 1 and {MAX_DEGREE}, got {degree}"),
            });
        }
        let n_coef = coefficients.len();
        if n_coef < degree + 1 || knots.len() != n_coef + degree + 1 {
            return Err(VolProbError::InvalidInput {
                message: format!(
                    "degree {degree} with {n_coef} coefficients needs {} knots, got {}",
                    n_coef + degree + 1,
                    knots.len()
                ),
            });
        }
        if knots.iter().any(|t| !t.is_finite()) || knots.windows(2).any(|w| w[1] < w[0]) {
            return Err(VolProbError::InvalidInput {
                message: "knots must be finite and non-decreasing".into(),
            });
        }
        if knots[n_coef] <= knots[degree] {
            return Err(VolProbError::InvalidInput {
                message: "spline domain is empty".into(),
            });
        }
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(VolProbError::InvalidInput {
                message: "coefficients must be finite".into(),
            });
        }

        let mut smile = Self {
            forward,
            expiry,
            degree,
            knots,
            coefficients,
            monotone_wings,
            left_slope: 0.0,
            right_slope: 0.0,
        };
        let (lo, hi) = smile.domain();
        let delta = 1e-6 * (hi - lo);
        let left = (smile.eval(lo + delta) - smile.eval(lo)) / delta;
        let right = (smile.eval(hi) - smile.eval(hi - delta)) / delta;
        (smile.left_slope, smile.right_slope) = if monotone_wings {
            (left.min(0.0), right.max(0.0))
        } else {
            (left, right)
        };
        Ok(smile)
    }

    /// Fit to weighted `(strike, implied_vol, weight)` observations.
    ///
    /// # Errors
    /// - [`VolProbError::InvalidInput`] for bad observations or options
    /// - [`VolProbError::CalibrationError`] with fewer distinct strikes than
    ///   `degree + 1`, or when the penalized normal equations are singular
    pub fn calibrate(
        forward: f64,
        expiry: f64,
        points: &[(f64, f64, f64)],
        options: &SplineOptions,
    ) -> error::Result<SplineCalibration> {
        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        let degree = options.degree;
        if degree == 0 || degree > MAX_DEGREE {
            return Err(VolProbError::InvalidInput {
                message: format!("spline degree must be between 1 and {MAX_DEGREE}, got {degree}"),
            });
        }
        if options.smoothing < 0.0 || !options.smoothing.is_finite() {
            return Err(VolProbError::InvalidInput {
                message: format!("smoothing must be non-negative, got {}", options.smoothing),
            });
        }
        for &(strike, vol, weight) in points {
            validate_positive(strike, "strike")?;
            validate_positive(vol, "implied vol")?;
            validate_positive(weight, "weight")?;
        }

        let k: Vec<f64> = points.iter().map(|p| (p.0 / forward).ln()).collect();
        let w: Vec<f64> = points.iter().map(|p| p.1 * p.1 * expiry).collect();
        let wt: Vec<f64> = points.iter().map(|p| p.2).collect();

        let mut distinct: Vec<f64> = k.clone();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        if distinct.len() < degree + 1 {
            return Err(calibration_error(format!(
                "degree {degree} needs at least {} distinct strikes, got {}",
                degree + 1,
                distinct.len()
            )));
        }
        let (k_min, k_max) = (distinct[0], distinct[distinct.len() - 1]);

        let segments = options
            .segments
            .unwrap_or_else(|| (distinct.len() - degree).clamp(1, MAX_SEGMENTS));
        if segments == 0 {
            return Err(VolProbError::InvalidInput {
                message: "spline needs at least one segment".into(),
            });
        }

        #[cfg(feature = "logging")]
        tracing::debug!(
            forward,
            expiry,
            n_quotes = points.len(),
            degree,
            segments,
            "spline calibration started"
        );

        let n_coef = segments + degree;
        let dx = (k_max - k_min) / segments as f64;
        let knots: Vec<f64> = (0..=n_coef + degree)
            .map(|j| k_min + (j as f64 - degree as f64) * dx)
            .collect();

        let mut basis = DMatrix::<f64>::zeros(points.len(), n_coef);
        for (i, &x) in k.iter().enumerate() {
            let span = find_span(&knots, degree, n_coef, x);
            for (r, v) in basis_functions(&knots, degree, span, x).into_iter().enumerate() {
                basis[(i, span - degree + r)] = v;
            }
        }
        let weights = DVector::from_column_slice(&wt);
        let weighted_basis =
            DMatrix::from_fn(points.len(), n_coef, |i, j| basis[(i, j)] * weights[i]);
        let gram = basis.transpose() * &weighted_basis;
        let rhs = weighted_basis.transpose() * DVector::from_column_slice(&w);

        let order = 2.min(n_coef - 1);
        let mut diff = DMatrix::<f64>::identity(n_coef, n_coef);
        for _ in 0..order {
            let rows = diff.nrows() - 1;
            diff = DMatrix::from_fn(rows, n_coef, |i, j| diff[(i + 1, j)] - diff[(i, j)]);
        }
        let penalty = diff.transpose() * &diff;
        let lambda = if penalty.trace() > 0.0 {
            options.smoothing * gram.trace() / penalty.trace()
        } else {
            0.0
        };
        let system = &gram + &penalty * lambda;

        let coef = match system.clone().cholesky() {
            Some(chol) => Some(chol.solve(&rhs)),
            None => system.lu().solve(&rhs),
        }
        .filter(|c| c.iter().all(|v| v.is_finite()))
        .ok_or_else(|| calibration_error("penalized normal equations are singular"))?;

        let smile = Self::new(
            forward,
            expiry,
            degree,
            knots,
            coef.iter().copied().collect(),
            options.monotone_wings,
        )
        .map_err(|e| calibration_error(format!("fitted spline invalid: {e}")))?;

        let rss: f64 = k
            .iter()
            .zip(&w)
            .zip(&wt)
            .map(|((&x, &y), &q)| {
                let r = smile.eval(x) - y;
                q * r * r
            })
            .sum();

        #[cfg(feature = "logging")]
        tracing::debug!(rss, lambda, "spline calibration complete");

        Ok(SplineCalibration {
            smile,
            rss,
            effective_smoothing: lambda,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knots(&self) -> &[f64] {
        &self.knots
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Log-moneyness range covered by the spline itself.
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[self.degree], self.knots[self.coefficients.len()])
    }

    /// Spline value inside the domain; the argument is clamped to it.
    fn eval(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        let x = x.clamp(lo, hi);
        let n_coef = self.coefficients.len();
        let span = find_span(&self.knots, self.degree, n_coef, x);
        basis_functions(&self.knots, self.degree, span, x)
            .iter()
            .enumerate()
            .map(|(r, b)| b * self.coefficients[span - self.degree + r])
            .sum()
    }
}

impl SmileSection for SplineSmile {
    fn total_variance(&self, k: f64) -> error::Result<Variance> {
        if !k.is_finite() {
            return Err(VolProbError::InvalidInput {
                message: format!("log-moneyness must be finite, got {k}"),
            });
        }
        let (lo, hi) = self.domain();
        let w = if k < lo {
            self.eval(lo) + self.left_slope * (k - lo)
        } else if k > hi {
            self.eval(hi) + self.right_slope * (k - hi)
        } else {
            self.eval(k)
        };
        Ok(Variance(w))
    }

    fn forward(&self) -> f64 {
        self.forward
    }

    fn expiry(&self) -> f64 {
        self.expiry
    }

    fn density(&self, strike: f64) -> error::Result<f64> {
        numeric_density(self, strike)
    }

    /// Scans the numerical density on 200 strikes spanning the fitted range
    /// widened by half its width on each side.
    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport> {
        const N: usize = 200;
        const TOL: f64 = 1e-8;

        let (lo, hi) = self.domain();
        let pad = 0.5 * (hi - lo);
        let negative = |k: f64| self.density(self.forward * k.exp()).is_ok_and(|d| d < -TOL);
        Ok(arbitrage::scan(self, lo - pad, hi + pad, N, negative))
    }
}
