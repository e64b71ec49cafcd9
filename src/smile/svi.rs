//! SVI (Stochastic Volatility Inspired) smile model.
//!
//! The raw SVI parameterization models total implied variance as:
//!
//! ```text
//! w(k) = a + b·[ρ(k − m) + √((k − m)² + σ²)]
//! ```
//!
//! where `k = ln(K/F)` is log-moneyness and `(a, b, ρ, m, σ)` are the five
//! SVI parameters.
//!
//! # References
//! - Gatheral, J. "The Volatility Surface: A Practitioner's Guide" (2006)
//! - Gatheral, J. & Jacquier, A. "Arbitrage-free SVI Volatility Surfaces" (2014)
//! - Zeliade Systems, "Quasi-Explicit Calibration of Gatheral's SVI Model" (2009)

use serde::{Deserialize, Serialize};

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SviOptions;
use crate::error::{self, VolProbError};
use crate::optim::{NelderMeadConfig, nelder_mead_2d};
use crate::pricing::norm_pdf;
use crate::smile::SmileSection;
use crate::smile::arbitrage::{self, ArbitrageReport};
use crate::types::Variance;
use crate::validate::validate_positive;

/// Largest |ρ| the calibrator will produce.
const RHO_MAX: f64 = 0.999;
/// Smallest σ the calibrator will search.
const SIGMA_MIN: f64 = 0.005;

/// SVI volatility smile with 5 parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SviSmileRaw", into = "SviSmileRaw")]
pub struct SviSmile {
    forward: f64,
    expiry: f64,
    /// Vertical level of the variance smile.
    a: f64,
    /// Wing slope.
    b: f64,
    /// Skew direction ρ ∈ (−1, 1).
    rho: f64,
    /// Horizontal shift.
    m: f64,
    /// ATM curvature.
    sigma: f64,
}

#[derive(Serialize, Deserialize)]
struct SviSmileRaw {
    forward: f64,
    expiry: f64,
    a: f64,
    b: f64,
    rho: f64,
    m: f64,
    sigma: f64,
}

impl TryFrom<SviSmileRaw> for SviSmile {
    type Error = VolProbError;
    fn try_from(raw: SviSmileRaw) -> Result<Self, Self::Error> {
        Self::new(
            raw.forward,
            raw.expiry,
            raw.a,
            raw.b,
            raw.rho,
            raw.m,
            raw.sigma,
        )
    }
}

impl From<SviSmile> for SviSmileRaw {
    fn from(s: SviSmile) -> Self {
        Self {
            forward: s.forward,
            expiry: s.expiry,
            a: s.a,
            b: s.b,
            rho: s.rho,
            m: s.m,
            sigma: s.sigma,
        }
    }
}

/// Outcome of [`SviSmile::calibrate`].
#[derive(Debug, Clone)]
pub struct SviCalibration {
    pub smile: SviSmile,
    /// Weighted residual sum of squares in total variance.
    pub rss: f64,
    /// Optimizer iterations summed over all starts.
    pub iterations: usize,
    /// Optimizer starts actually run.
    pub n_starts: usize,
    /// Whether the winning start met its tolerance before the iteration cap.
    pub converged: bool,
    /// Search parameters (`"m"`, `"sigma"`) that ended on their box bound.
    pub at_bound: Vec<&'static str>,
}

#[derive(Debug, Clone, Copy)]
struct Params {
    a: f64,
    b: f64,
    rho: f64,
}

impl Params {
    fn min_variance(&self, sigma: f64) -> f64 {
        self.a + self.b * sigma * (1.0 - self.rho * self.rho).sqrt()
    }
}

/// Calibration data in total-variance space.
struct Slice {
    k: Vec<f64>,
    w: Vec<f64>,
    weight: Vec<f64>,
}

impl Slice {
    fn rss(&self, p: &Params, m: f64, sigma: f64) -> f64 {
        self.k
            .iter()
            .zip(&self.w)
            .zip(&self.weight)
            .map(|((&k, &w), &wt)| {
                let r = raw_svi(p.a, p.b, p.rho, m, sigma, k) - w;
                wt * r * r
            })
            .sum()
    }

    /// Weighted least squares `target ≈ design · x`.
    fn wls(&self, design: DMatrix<f64>) -> Option<DVector<f64>> {
        let sw = DVector::from_iterator(self.weight.len(), self.weight.iter().map(|w| w.sqrt()));
        let mut a_mat = design;
        for (i, s) in sw.iter().enumerate() {
            a_mat.row_mut(i).scale_mut(*s);
        }
        let b_vec = DVector::from_iterator(
            self.w.len(),
            self.w.iter().zip(sw.iter()).map(|(w, s)| w * s),
        );
        let ata = a_mat.transpose() * &a_mat;
        let atb = a_mat.transpose() * &b_vec;
        let x = ata.qr().solve(&atb)?;
        x.iter().all(|v| v.is_finite()).then_some(x)
    }

    /// Best feasible `(a, b, ρ)` for fixed `(m, σ)`.
    ///
    /// Tries the unconstrained linear solution first, then the faces of the
    /// feasible set (|ρ| at its bound, minimum variance at zero, flat smile).
    fn solve(&self, m: f64, sigma: f64) -> Option<(Params, f64)> {
        let n = self.k.len();
        let dk: Vec<f64> = self.k.iter().map(|k| k - m).collect();
        let root: Vec<f64> = dk.iter().map(|d| (d * d + sigma * sigma).sqrt()).collect();

        let mut candidates: Vec<Params> = Vec::with_capacity(6);
        let mut rho_hint = 0.0;

        let full = DMatrix::<f64>::from_fn(n, 3, |i, j| match j {
            0 => 1.0,
            1 => dk[i],
            _ => root[i],
        });
        if let Some(x) = self.wls(full)
            && x[2] > 0.0
        {
            let rho = x[1] / x[2];
            rho_hint = rho.clamp(-RHO_MAX, RHO_MAX);
            if rho.abs() < RHO_MAX {
                candidates.push(Params {
                    a: x[0],
                    b: x[2],
                    rho,
                });
            }
        }

        for rho in [-RHO_MAX, RHO_MAX] {
            let design = DMatrix::<f64>::from_fn(n, 2, |i, j| match j {
                0 => 1.0,
                _ => rho * dk[i] + root[i],
            });
            if let Some(x) = self.wls(design)
                && x[1] >= 0.0
            {
                candidates.push(Params {
                    a: x[0],
                    b: x[1],
                    rho,
                });
            }
        }

        // Minimum variance pinned at zero: w = b·(ρ·dk + root − σ√(1−ρ²)).
        for rho in [rho_hint, 0.0] {
            let shift = sigma * (1.0 - rho * rho).sqrt();
            let (num, den) = (0..n).fold((0.0, 0.0), |(num, den), i| {
                let g = rho * dk[i] + root[i] - shift;
                (
                    num + self.weight[i] * g * self.w[i],
                    den + self.weight[i] * g * g,
                )
            });
            if den > 0.0 && num > 0.0 {
                let b = num / den;
                candidates.push(Params {
                    a: -(b * sigma * (1.0 - rho * rho).sqrt()),
                    b,
                    rho,
                });
            }
        }

        let total_weight: f64 = self.weight.iter().sum();
        let level = self
            .w
            .iter()
            .zip(&self.weight)
            .map(|(w, wt)| w * wt)
            .sum::<f64>()
            / total_weight;
        candidates.push(Params {
            a: level.max(0.0),
            b: 0.0,
            rho: 0.0,
        });

        candidates
            .into_iter()
            .filter(|p| p.b >= 0.0 && p.min_variance(sigma) >= 0.0 && p.a.is_finite())
            .map(|p| (p, self.rss(&p, m, sigma)))
            .filter(|(_, rss)| rss.is_finite())
            .min_by(|x, y| x.1.total_cmp(&y.1))
    }
}

fn raw_svi(a: f64, b: f64, rho: f64, m: f64, sigma: f64, k: f64) -> f64 {
    let dk = k - m;
    a + b * (rho * dk + (dk * dk + sigma * sigma).sqrt())
}

fn calibration_error(message: impl Into<String>, rms_error: Option<f64>) -> VolProbError {
    VolProbError::CalibrationError {
        message: message.into(),
        model: "SVI",
        rms_error,
    }
}

impl SviSmile {
    /// Create an SVI smile from parameters.
    ///
    /// Validates the Gatheral-Jacquier conditions:
    /// - `b ≥ 0`
    /// - `|ρ| < 1`
    /// - `σ > 0`
    /// - `a + bσ√(1 − ρ²) ≥ 0` (non-negative minimum variance)
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] if parameters violate these
    /// conditions or if forward/expiry are non-positive.
    pub fn new(
        forward: f64,
        expiry: f64,
        a: f64,
        b: f64,
        rho: f64,
        m: f64,
        sigma: f64,
    ) -> error::Result<Self> {
        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        if b < 0.0 || !b.is_finite() {
            return Err(VolProbError::InvalidInput {
                message: format!("b must be non-negative, got {b}"),
            });
        }
        if rho.abs() >= 1.0 || rho.is_nan() {
            return Err(VolProbError::InvalidInput {
                message: format!("|rho| must be less than 1, got {rho}"),
            });
        }
        if sigma <= 0.0 || !sigma.is_finite() {
            return Err(VolProbError::InvalidInput {
                message: format!("sigma must be positive, got {sigma}"),
            });
        }
        if !m.is_finite() {
            return Err(VolProbError::InvalidInput {
                message: format!("m must be finite, got {m}"),
            });
        }
        if !a.is_finite() {
            return Err(VolProbError::InvalidInput {
                message: format!("a must be finite, got {a}"),
            });
        }
        let min_variance = a + b * sigma * (1.0 - rho * rho).sqrt();
        if min_variance < 0.0 {
            return Err(VolProbError::InvalidInput {
                message: format!(
                    "minimum variance is negative: a + b*sigma*sqrt(1-rho^2) = {min_variance}"
                ),
            });
        }

        Ok(Self {
            forward,
            expiry,
            a,
            b,
            rho,
            m,
            sigma,
        })
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn m(&self) -> f64 {
        self.m
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Calibrate SVI parameters to weighted `(strike, implied_vol, weight)` observations.
    ///
    /// For fixed `(m, σ)` the remaining parameters enter linearly and are
    /// solved by weighted least squares, projected onto the feasible set.
    /// A grid search seeds a Nelder-Mead search over `(m, σ)`, repeated from
    /// `options.n_starts − 1` further starting points drawn from a generator
    /// seeded with `options.random_seed`. The best feasible fit wins.
    ///
    /// # Errors
    /// - [`VolProbError::InvalidInput`] for non-positive strikes, vols or weights
    /// - [`VolProbError::CalibrationError`] with fewer than 5 distinct strikes
    ///   or when no feasible parameter set is found
    pub fn calibrate(
        forward: f64,
        expiry: f64,
        points: &[(f64, f64, f64)],
        options: &SviOptions,
    ) -> error::Result<SviCalibration> {
        #[cfg(feature = "logging")]
        tracing::debug!(
            forward,
            expiry,
            n_quotes = points.len(),
            n_starts = options.n_starts,
            "SVI calibration started"
        );

        /// Distinct strikes needed for 5 free parameters.
        const MIN_POINTS: usize = 5;
        /// Grid search resolution for (m, sigma) initialization.
        const GRID_N: usize = 15;
        /// Simplex diameter convergence threshold.
        const NM_DIAMETER_TOL: f64 = 1e-8;

        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        for &(strike, vol, weight) in points {
            validate_positive(strike, "strike")?;
            validate_positive(vol, "implied vol")?;
            validate_positive(weight, "weight")?;
        }
        let mut strikes: Vec<f64> = points.iter().map(|p| p.0).collect();
        strikes.sort_by(f64::total_cmp);
        strikes.dedup();
        if strikes.len() < MIN_POINTS {
            return Err(calibration_error(
                format!(
                    "at least {MIN_POINTS} distinct strikes required, got {}",
                    strikes.len()
                ),
                None,
            ));
        }

        let slice = Slice {
            k: points.iter().map(|p| (p.0 / forward).ln()).collect(),
            w: points.iter().map(|p| p.1 * p.1 * expiry).collect(),
            weight: points.iter().map(|p| p.2).collect(),
        };

        let k_min = slice.k.iter().copied().fold(f64::INFINITY, f64::min);
        let k_max = slice.k.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let k_range = (k_max - k_min).max(0.1);

        let objective = |m: f64, sigma: f64| -> f64 {
            if sigma <= 0.0 {
                return f64::MAX;
            }
            slice.solve(m, sigma).map_or(f64::MAX, |(_, rss)| rss)
        };

        let m_lo = k_min - 0.5 * k_range;
        let m_hi = k_max + 0.5 * k_range;
        let sigma_lo = SIGMA_MIN;
        let sigma_hi = match options.max_sigma {
            Some(max) => {
                validate_positive(max, "max_sigma")?;
                max.max(2.0 * SIGMA_MIN)
            }
            None => (2.0 * k_range).max(1.0),
        };

        let mut best_m = 0.0;
        let mut best_sigma = 0.1;
        let mut best_rss = f64::MAX;
        for im in 0..GRID_N {
            let m = m_lo + (m_hi - m_lo) * (im as f64) / ((GRID_N - 1) as f64);
            for is in 0..GRID_N {
                let sigma = sigma_lo + (sigma_hi - sigma_lo) * (is as f64) / ((GRID_N - 1) as f64);
                let rss = objective(m, sigma);
                if rss < best_rss {
                    best_rss = rss;
                    best_m = m;
                    best_sigma = sigma;
                }
            }
        }
        if best_rss >= f64::MAX {
            return Err(calibration_error(
                "grid search found no feasible starting point",
                None,
            ));
        }

        let nm_config = NelderMeadConfig {
            max_iter: options.max_iter,
            diameter_tol: NM_DIAMETER_TOL,
            fvalue_tol: options.tolerance,
            bounds: [(m_lo, m_hi), (sigma_lo, sigma_hi)],
        };
        let step = (
            (m_hi - m_lo) / (GRID_N as f64) * 0.5,
            ((sigma_hi - sigma_lo) / (GRID_N as f64) * 0.5).max(0.001),
        );

        let n_starts = options.n_starts.max(1);
        let mut rng = StdRng::seed_from_u64(options.random_seed);
        let mut starts = vec![(best_m, best_sigma)];
        starts.extend((1..n_starts).map(|_| {
            (
                rng.gen_range(m_lo..=m_hi),
                rng.gen_range(sigma_lo..=sigma_hi),
            )
        }));

        let mut iterations = 0;
        let mut winner: Option<(f64, f64, f64, bool)> = None;
        for start in starts {
            let r = nelder_mead_2d(objective, start, step, &nm_config);
            iterations += r.iterations;
            if winner.is_none_or(|(_, _, f, _)| r.fval < f) {
                winner = Some((r.x, r.y, r.fval, r.converged));
            }
        }

        let (m, sigma, _, converged) = winner
            .filter(|w| w.2 < f64::MAX)
            .ok_or_else(|| {
                calibration_error("no feasible candidate within the iteration budget", None)
            })?;
        let (p, rss) = slice
            .solve(m, sigma)
            .ok_or_else(|| calibration_error("linear solve failed at optimal (m, sigma)", None))?;
        let on_edge = |x: f64, (lo, hi): (f64, f64)| {
            let tol = 1e-4 * (hi - lo);
            (x - lo).abs() <= tol || (x - hi).abs() <= tol
        };
        let mut at_bound = Vec::new();
        if on_edge(m, (m_lo, m_hi)) {
            at_bound.push("m");
        }
        if on_edge(sigma, (sigma_lo, sigma_hi)) {
            at_bound.push("sigma");
        }
        #[cfg(feature = "logging")]
        if !at_bound.is_empty() {
            tracing::warn!(m, sigma, sigma_hi, ?at_bound, "SVI search ended on its bounds");
        }

        let total_weight: f64 = slice.weight.iter().sum();
        let rms = (rss / total_weight).sqrt();

        #[cfg(feature = "logging")]
        tracing::debug!(
            a = p.a,
            b = p.b,
            rho = p.rho,
            m,
            sigma,
            rss,
            iterations,
            "SVI calibration complete"
        );

        let smile = Self::new(forward, expiry, p.a, p.b, p.rho, m, sigma).map_err(|e| {
            calibration_error(format!("calibrated params invalid: {e}"), Some(rms))
        })?;
        Ok(SviCalibration {
            smile,
            rss,
            iterations,
            n_starts,
            converged,
            at_bound,
        })
    }

    fn total_variance_at_k(&self, k: f64) -> f64 {
        raw_svi(self.a, self.b, self.rho, self.m, self.sigma, k)
    }

    /// w'(k) = b·[ρ + (k−m)/√((k−m)² + σ²)]
    fn w_prime(&self, k: f64) -> f64 {
        let dk = k - self.m;
        let r = (dk * dk + self.sigma * self.sigma).sqrt();
        self.b * (self.rho + dk / r)
    }

    /// w''(k) = b·σ²/((k−m)² + σ²)^(3/2)
    fn w_double_prime(&self, k: f64) -> f64 {
        let dk = k - self.m;
        let r2 = dk * dk + self.sigma * self.sigma;
        self.b * self.sigma * self.sigma / (r2 * r2.sqrt())
    }

    /// Gatheral g-function; g(k) ≥ 0 everywhere means no butterfly arbitrage.
    ///
    /// # Reference
    /// Gatheral & Jacquier (2014), Definition 4.1.
    fn g_function(&self, k: f64) -> f64 {
        let w = self.total_variance_at_k(k);
        if w <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let wp = self.w_prime(k);
        let wpp = self.w_double_prime(k);
        let term1 = 1.0 - k * wp / (2.0 * w);
        term1 * term1 - wp * wp / 4.0 * (1.0 / w + 0.25) + wpp / 2.0
    }
}

impl SmileSection for SviSmile {
    fn total_variance(&self, k: f64) -> error::Result<Variance> {
        Ok(Variance(self.total_variance_at_k(k)))
    }

    fn forward(&self) -> f64 {
        self.forward
    }

    fn expiry(&self) -> f64 {
        self.expiry
    }

    /// Risk-neutral density `q(K) = g(k)·n(d₂)/(K·√w)` with `d₂ = −k/√w − √w/2`.
    fn density(&self, strike: f64) -> error::Result<f64> {
        validate_positive(strike, "strike")?;
        let k = (strike / self.forward).ln();
        let w = self.total_variance_at_k(k);
        if w <= 0.0 {
            return Err(VolProbError::NumericalError {
                message: format!("SVI total variance is non-positive at k={k}: w={w}"),
            });
        }
        let sqrt_w = w.sqrt();
        let d2 = -k / sqrt_w - sqrt_w / 2.0;
        Ok(self.g_function(k) * norm_pdf(d2) / (strike * sqrt_w))
    }

    /// Scans g(k) on 200 points over k ∈ \[−3, 3\].
    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport> {
        const N: usize = 200;
        const K_MIN: f64 = -3.0;
        const K_MAX: f64 = 3.0;
        const TOL: f64 = 1e-10;

        Ok(arbitrage::scan(self, K_MIN, K_MAX, N, |k| self.g_function(k) < -TOL))
    }
}
