//! # volprob
//!
//! Market-implied probability distributions from listed option quotes.
//!
//! Provides the full pipeline: raw option quotes → filtering and price
//! selection → implied vol extraction → smile fitting (SVI or penalized
//! B-spline) → Breeden-Litzenberger density → probability queries.
//!
//! ## Architecture
//!
//! - **`quotes`** — Quote records, staleness filter, OTM selection
//! - **`market`** — Valuation date, underlying, rates, dividends
//! - **`pricing`** — Black-76 and Black-Scholes-Merton engines
//! - **`implied`** — Implied volatility extraction (Brent, Newton)
//! - **`smile`** — Single-expiry smile models and calibration
//! - **`surface`** — Multi-expiry calibration with per-expiry failures
//! - **`density`** — Risk-neutral density from a fitted curve
//! - **`distribution`** — Probability queries on the extracted density
//!
//! ## Design
//!
//! - **Explicit configuration.** Every run takes a [`FitConfig`]; there is no
//!   global state and no reading of the system clock. Staleness and time to
//!   expiry are measured from the valuation date in [`MarketContext`].
//! - **No panics.** Every fallible operation returns [`Result`]. Library code
//!   never calls `unwrap()` or `expect()`.
//! - **Immutable results.** Fitted curves and distributions cannot be
//!   modified after construction.
//! - **Thread-safe.** Expiries are fitted independently, in parallel with
//!   the `parallel` feature.
//! - **Serializable.** Quotes, configuration, fitted models and
//!   distributions implement Serde `Serialize` / `Deserialize`, with
//!   validation on deserialization where invariants exist.
//!
//! ## Example
//!
//! ```
//! use chrono::NaiveDate;
//! use volprob::{DensityExtractor, FitConfig, GridSpec, MarketContext, SmileCalibrator};
//! use volprob::pricing::PricingEngine;
//! use volprob::quotes::OptionQuote;
//! use volprob::types::OptionType;
//!
//! let val = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap();
//! let expiry = NaiveDate::from_ymd_opt(2025, 4, 2).unwrap();
//! let market = MarketContext::new(val, 100.0, 0.04)?;
//! let ctx = market.at_expiry(expiry)?;
//! let quotes: Vec<OptionQuote> = (0..11)
//!     .map(|i| {
//!         let k = 75.0 + 5.0 * i as f64;
//!         let ot = if k < 100.0 { OptionType::Put } else { OptionType::Call };
//!         let p = PricingEngine::Black76.price(&ctx, k, 0.3, ot);
//!         OptionQuote::new(k, expiry, ot, val).with_last(p)
//!     })
//!     .collect();
//!
//! let config = FitConfig::default();
//! let curve = SmileCalibrator::new(&config).fit_quotes(&quotes, &market, expiry)?;
//! let dist = DensityExtractor::derive(&curve, &market, &GridSpec::default())?;
//! assert!((dist.prob_below(120.0) + dist.prob_above(120.0) - 1.0).abs() < 1e-12);
//! assert!((dist.expected_value() / curve.forward() - 1.0).abs() < 1e-2);
//! # Ok::<(), volprob::VolProbError>(())
//! ```

pub mod config;
pub mod conventions;
pub mod density;
pub mod distribution;
pub mod error;
pub mod implied;
pub mod market;
mod optim;
pub mod pricing;
pub mod quotes;
pub mod smile;
pub mod surface;
pub mod types;
mod validate;

#[doc(inline)]
pub use config::FitConfig;
#[doc(inline)]
pub use density::{DensityExtractor, GridSpec};
#[doc(inline)]
pub use distribution::{Distribution, DistributionSurface};
#[doc(inline)]
pub use error::{Result, VolProbError};
#[doc(inline)]
pub use market::MarketContext;
#[doc(inline)]
pub use smile::{FittedVolCurve, SmileCalibrator, SmileSection};
#[doc(inline)]
pub use surface::{FittedVolSurface, SurfaceCalibrator};
#[doc(inline)]
pub use types::{OptionType, Variance, Vol};
