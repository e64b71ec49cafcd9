//! Market context: valuation date, underlying, rates and dividends.
//!
//! [`MarketContext`] is the caller-supplied snapshot. [`ExpiryContext`] is the
//! same snapshot resolved for one expiry: year fraction, continuous rate,
//! discount factor, dividend adjustments and forward. Pricing and density
//! extraction only ever see the resolved form.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::conventions::{self, RateCompounding};
use crate::error::{self, VolProbError};
use crate::validate::{validate_finite, validate_non_negative, validate_positive};

/// A single cash dividend paid on `date`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub date: NaiveDate,
    pub amount: f64,
}

/// Dividend input for the underlying.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DividendInfo {
    /// No dividend information supplied.
    #[default]
    None,
    /// Continuous dividend yield `q`.
    Yield(f64),
    /// Discrete cash dividends, sorted by date.
    Schedule(Vec<Dividend>),
}

/// Market snapshot used to price and invert option quotes.
///
/// Deserialization runs the same checks as the constructor and builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MarketContextRaw")]
pub struct MarketContext {
    pub valuation_date: NaiveDate,
    pub underlying_price: f64,
    pub risk_free_rate: f64,
    #[serde(default)]
    pub rate_compounding: RateCompounding,
    /// Expiry used by single-expiry entry points when none is given explicitly.
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub dividend: DividendInfo,
}

#[derive(Deserialize)]
struct MarketContextRaw {
    valuation_date: NaiveDate,
    underlying_price: f64,
    risk_free_rate: f64,
    #[serde(default)]
    rate_compounding: RateCompounding,
    #[serde(default)]
    expiry_date: Option<NaiveDate>,
    #[serde(default)]
    dividend: DividendInfo,
}

impl TryFrom<MarketContextRaw> for MarketContext {
    type Error = VolProbError;

    fn try_from(raw: MarketContextRaw) -> Result<Self, Self::Error> {
        let mut market = Self::new(raw.valuation_date, raw.underlying_price, raw.risk_free_rate)?
            .with_compounding(raw.rate_compounding);
        market.expiry_date = raw.expiry_date;
        match raw.dividend {
            DividendInfo::None => Ok(market),
            DividendInfo::Yield(q) => market.with_dividend_yield(q),
            DividendInfo::Schedule(schedule) => market.with_dividend_schedule(schedule),
        }
    }
}

impl MarketContext {
    /// Create a context with continuous compounding and no dividends.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] for a non-positive underlying
    /// price or a non-finite rate.
    pub fn new(
        valuation_date: NaiveDate,
        underlying_price: f64,
        risk_free_rate: f64,
    ) -> error::Result<Self> {
        validate_positive(underlying_price, "underlying_price")?;
        validate_finite(risk_free_rate, "risk_free_rate")?;
        Ok(Self {
            valuation_date,
            underlying_price,
            risk_free_rate,
            rate_compounding: RateCompounding::Continuous,
            expiry_date: None,
            dividend: DividendInfo::None,
        })
    }

    /// Set the compounding convention of `risk_free_rate`.
    pub fn with_compounding(mut self, compounding: RateCompounding) -> Self {
        self.rate_compounding = compounding;
        self
    }

    /// Set the default expiry for single-expiry fits.
    pub fn with_expiry(mut self, expiry: NaiveDate) -> Self {
        self.expiry_date = Some(expiry);
        self
    }

    /// Use a continuous dividend yield.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] if `q` is not finite.
    pub fn with_dividend_yield(mut self, q: f64) -> error::Result<Self> {
        validate_finite(q, "dividend_yield")?;
        self.dividend = DividendInfo::Yield(q);
        Ok(self)
    }

    /// Use a discrete dividend schedule. Entries are sorted by date.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] if any amount is negative or
    /// not finite.
    pub fn with_dividend_schedule(mut self, mut schedule: Vec<Dividend>) -> error::Result<Self> {
        for d in &schedule {
            validate_non_negative(d.amount, "dividend amount")?;
        }
        schedule.sort_by_key(|d| d.date);
        self.dividend = DividendInfo::Schedule(schedule);
        Ok(self)
    }

    /// Whether a dividend yield or schedule was supplied.
    pub fn has_dividend_info(&self) -> bool {
        !matches!(self.dividend, DividendInfo::None)
    }

    /// The configured default expiry.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] if no expiry date was set.
    pub fn default_expiry(&self) -> error::Result<NaiveDate> {
        self.expiry_date.ok_or_else(|| VolProbError::InvalidInput {
            message: "market context has no expiry_date".into(),
        })
    }

    /// Resolve the context for a single expiry.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] if the expiry is not after the
    /// valuation date or scheduled dividends exceed the underlying price.
    pub fn at_expiry(&self, expiry: NaiveDate) -> error::Result<ExpiryContext> {
        let t = conventions::year_fraction(self.valuation_date, expiry);
        if t <= 0.0 {
            return Err(VolProbError::InvalidInput {
                message: format!(
                    "expiry {expiry} must be after valuation date {}",
                    self.valuation_date
                ),
            });
        }
        let rate = self.rate_compounding.to_continuous(self.risk_free_rate, t);
        let (dividend_yield, dividend_pv) = match &self.dividend {
            DividendInfo::None => (0.0, 0.0),
            DividendInfo::Yield(q) => (*q, 0.0),
            DividendInfo::Schedule(schedule) => {
                let pv: f64 = schedule
                    .iter()
                    .filter(|d| d.date > self.valuation_date && d.date <= expiry)
                    .map(|d| {
                        let tau = conventions::year_fraction(self.valuation_date, d.date);
                        d.amount * (-rate * tau).exp()
                    })
                    .sum();
                (0.0, pv)
            }
        };
        let spot = self.underlying_price - dividend_pv;
        if spot <= 0.0 {
            return Err(VolProbError::InvalidInput {
                message: format!(
                    "dividends with present value {dividend_pv} exceed underlying price {}",
                    self.underlying_price
                ),
            });
        }
        Ok(ExpiryContext {
            expiry,
            time_to_expiry: t,
            spot,
            rate,
            discount: (-rate * t).exp(),
            dividend_yield,
            forward: conventions::forward_price(spot, rate, dividend_yield, t),
        })
    }
}

/// Market data resolved for one expiry.
///
/// `spot` is already net of scheduled dividends (escrowed-dividend model), so
/// spot-based pricing uses it directly with `dividend_yield`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpiryContext {
    pub expiry: NaiveDate,
    /// ACT/365 year fraction from valuation to expiry.
    pub time_to_expiry: f64,
    /// Dividend-adjusted spot.
    pub spot: f64,
    /// Continuously compounded risk-free rate.
    pub rate: f64,
    /// `exp(−rT)`.
    pub discount: f64,
    pub dividend_yield: f64,
    pub forward: f64,
}

impl ExpiryContext {
    /// Replace the forward, re-deriving the implied carry yield so spot-based
    /// and forward-based pricing stay consistent.
    ///
    /// # Errors
    /// Returns [`VolProbError::InvalidInput`] if `forward` is not positive.
    pub fn with_forward(mut self, forward: f64) -> error::Result<Self> {
        validate_positive(forward, "forward")?;
        self.dividend_yield = self.rate - (forward / self.spot).ln() / self.time_to_expiry;
        self.forward = forward;
        Ok(self)
    }
}
