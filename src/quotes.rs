//! Option quotes: validation, staleness filtering and price selection.
//!
//! [`QuoteFilter::apply`] turns raw [`OptionQuote`]s into [`PricedQuote`]s
//! carrying exactly one usable price each, and reports every exclusion in a
//! [`FilterReport`]. Individual bad quotes are dropped and counted; only an
//! empty result is an error.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::conventions;
use crate::error::{self, VolProbError};
use crate::types::OptionType;

/// A single traded option quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    pub last_trade_date: NaiveDate,
}

impl OptionQuote {
    /// Quote with no price fields yet.
    pub fn new(
        strike: f64,
        expiry: NaiveDate,
        option_type: OptionType,
        last_trade_date: NaiveDate,
    ) -> Self {
        Self {
            strike,
            expiry,
            option_type,
            last: None,
            bid: None,
            ask: None,
            volume: None,
            open_interest: None,
            last_trade_date,
        }
    }

    /// Set the last traded price.
    pub fn with_last(mut self, last: f64) -> Self {
        self.last = Some(last);
        self
    }

    /// Set bid and ask.
    pub fn with_bid_ask(mut self, bid: f64, ask: f64) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Set traded volume.
    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Set open interest.
    pub fn with_open_interest(mut self, open_interest: f64) -> Self {
        self.open_interest = Some(open_interest);
        self
    }
}

/// Which quote field supplies the option price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceMethod {
    /// `(bid + ask) / 2`, falling back to `last` when the book is missing or crossed.
    #[default]
    Mid,
    Last,
    Bid,
    Ask,
}

/// How calibration points are weighted in the fitting loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingScheme {
    /// Every point weighs the same.
    #[default]
    Uniform,
    /// Weight by traded volume.
    Volume,
    /// Weight by open interest.
    OpenInterest,
}

impl WeightingScheme {
    /// Raw (unnormalised) weight of a quote. Missing or tiny liquidity counts as 1.
    pub fn raw_weight(self, quote: &OptionQuote) -> f64 {
        let liquidity = match self {
            WeightingScheme::Uniform => return 1.0,
            WeightingScheme::Volume => quote.volume,
            WeightingScheme::OpenInterest => quote.open_interest,
        };
        liquidity
            .filter(|v| v.is_finite())
            .map_or(1.0, |v| v.max(1.0))
    }
}

/// A quote with its selected price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedQuote {
    pub quote: OptionQuote,
    pub price: f64,
}

/// Counts of quotes kept and excluded by [`QuoteFilter::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub total: usize,
    /// Last trade older than the staleness limit.
    pub stale: usize,
    /// Non-positive or non-finite strike.
    pub invalid_strike: usize,
    /// The configured price field is absent.
    pub missing_price: usize,
    /// Selected price is non-positive or non-finite.
    pub non_positive_price: usize,
    /// Same (expiry, type, strike) as a more liquid quote.
    pub duplicate: usize,
    /// Mid requested but `last` used instead.
    pub mid_fallback: usize,
    pub kept: usize,
}

impl FilterReport {
    /// Total number of excluded quotes.
    pub fn excluded(&self) -> usize {
        self.total - self.kept
    }
}

/// Staleness and price-selection filter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QuoteFilter {
    pub price_method: PriceMethod,
    /// Maximum days between last trade and valuation; `None` keeps everything.
    pub max_staleness_days: Option<u32>,
}

impl QuoteFilter {
    pub fn new(price_method: PriceMethod, max_staleness_days: Option<u32>) -> Self {
        Self {
            price_method,
            max_staleness_days,
        }
    }

    /// Filter quotes against `valuation_date` and select one price per quote.
    ///
    /// Staleness is measured against `valuation_date`, never the system clock.
    ///
    /// # Errors
    /// Returns [`VolProbError::InsufficientData`] if no quote survives.
    pub fn apply(
        &self,
        quotes: &[OptionQuote],
        valuation_date: NaiveDate,
    ) -> error::Result<(Vec<PricedQuote>, FilterReport)> {
        let mut report = FilterReport {
            total: quotes.len(),
            ..FilterReport::default()
        };
        let mut kept: Vec<PricedQuote> = Vec::with_capacity(quotes.len());
        let mut slot: HashMap<(NaiveDate, OptionType, u64), usize> = HashMap::new();

        for quote in quotes {
            if let Some(max_days) = self.max_staleness_days
                && (valuation_date - quote.last_trade_date).num_days() > i64::from(max_days)
            {
                report.stale += 1;
                continue;
            }
            if !quote.strike.is_finite() || quote.strike <= 0.0 {
                report.invalid_strike += 1;
                continue;
            }
            let Some(price) = self.select_price(quote, &mut report) else {
                report.missing_price += 1;
                continue;
            };
            if !price.is_finite() || price <= 0.0 {
                report.non_positive_price += 1;
                continue;
            }

            let key = (quote.expiry, quote.option_type, quote.strike.to_bits());
            let priced = PricedQuote {
                quote: quote.clone(),
                price,
            };
            match slot.get(&key) {
                Some(&i) => {
                    report.duplicate += 1;
                    let incumbent = kept[i].quote.volume.unwrap_or(0.0);
                    if quote.volume.unwrap_or(0.0) > incumbent {
                        kept[i] = priced;
                    }
                }
                None => {
                    slot.insert(key, kept.len());
                    kept.push(priced);
                }
            }
        }

        report.kept = kept.len();

        #[cfg(feature = "logging")]
        tracing::debug!(
            total = report.total,
            kept = report.kept,
            stale = report.stale,
            missing_price = report.missing_price,
            non_positive_price = report.non_positive_price,
            duplicate = report.duplicate,
            "quote filter applied"
        );

        if kept.is_empty() {
            return Err(VolProbError::InsufficientData {
                message: format!(
                    "no quotes survived filtering ({} stale, {} missing price, {} non-positive)",
                    report.stale, report.missing_price, report.non_positive_price
                ),
                available: 0,
                required: 1,
            });
        }
        Ok((kept, report))
    }

    fn select_price(&self, quote: &OptionQuote, report: &mut FilterReport) -> Option<f64> {
        match self.price_method {
            PriceMethod::Last => quote.last,
            PriceMethod::Bid => quote.bid,
            PriceMethod::Ask => quote.ask,
            PriceMethod::Mid => match (quote.bid, quote.ask) {
                (Some(bid), Some(ask)) if bid > 0.0 && ask >= bid => Some(0.5 * (bid + ask)),
                _ => {
                    let last = quote.last?;
                    report.mid_fallback += 1;
                    Some(last)
                }
            },
        }
    }
}

/// Pick one quote per strike: puts below the forward, calls at or above it.
///
/// Falls back to the other side where only one side is quoted. The result is
/// sorted by strike with unique strikes.
pub fn select_otm(quotes: &[PricedQuote], forward: f64) -> Vec<&PricedQuote> {
    let mut by_strike: Vec<(f64, Option<&PricedQuote>, Option<&PricedQuote>)> = Vec::new();
    let mut index: HashMap<u64, usize> = HashMap::new();
    for q in quotes {
        let i = *index.entry(q.quote.strike.to_bits()).or_insert_with(|| {
            by_strike.push((q.quote.strike, None, None));
            by_strike.len() - 1
        });
        match q.quote.option_type {
            OptionType::Call => by_strike[i].1 = Some(q),
            OptionType::Put => by_strike[i].2 = Some(q),
        }
    }
    by_strike.sort_by(|a, b| a.0.total_cmp(&b.0));
    by_strike
        .into_iter()
        .filter_map(|(strike, call, put)| {
            if strike < forward {
                put.or(call)
            } else {
                call.or(put)
            }
        })
        .collect()
}

/// Forward implied by put-call parity on strikes quoted on both sides.
///
/// Uses the median over the (up to) three strikes closest to `spot`.
/// Returns `None` when no strike carries both a call and a put.
pub fn parity_forward(quotes: &[PricedQuote], spot: f64, discount: f64) -> Option<f64> {
    /// Strikes nearest the money used for the median.
    const N_NEAREST: usize = 3;

    let mut calls: HashMap<u64, f64> = HashMap::new();
    let mut puts: HashMap<u64, f64> = HashMap::new();
    for q in quotes {
        let side = match q.quote.option_type {
            OptionType::Call => &mut calls,
            OptionType::Put => &mut puts,
        };
        side.insert(q.quote.strike.to_bits(), q.price);
    }
    let mut pairs: Vec<(f64, f64)> = calls
        .iter()
        .filter_map(|(bits, &c)| {
            let k = f64::from_bits(*bits);
            puts.get(bits)
                .map(|&p| (k, conventions::parity_forward(k, c, p, discount)))
        })
        .filter(|&(_, f)| f.is_finite() && f > 0.0)
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by(|a, b| (a.0 - spot).abs().total_cmp(&(b.0 - spot).abs()));
    let mut nearest: Vec<f64> = pairs.iter().take(N_NEAREST).map(|&(_, f)| f).collect();
    nearest.sort_by(f64::total_cmp);
    let n = nearest.len();
    Some(if n % 2 == 1 {
        nearest[n / 2]
    } else {
        0.5 * (nearest[n / 2 - 1] + nearest[n / 2])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 20).unwrap()
    }

    fn call(strike: f64, traded: u32) -> OptionQuote {
        OptionQuote::new(strike, expiry(), OptionType::Call, date(traded))
    }

    #[test]
    fn stale_quotes_excluded() {
        let quotes = vec![
            call(100.0, 10).with_last(5.0),
            call(105.0, 2).with_last(3.0),
        ];
        let filter = QuoteFilter::new(PriceMethod::Last, Some(3));
        let (kept, report) = filter.apply(&quotes, date(10)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(report.stale, 1);
        assert_eq!(report.excluded(), 1);
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let quotes = vec![call(100.0, 7).with_last(5.0)];
        let filter = QuoteFilter::new(PriceMethod::Last, Some(3));
        assert!(filter.apply(&quotes, date(10)).is_ok());
        let filter = QuoteFilter::new(PriceMethod::Last, Some(0));
        assert!(filter.apply(&quotes, date(10)).is_err());
    }

    #[test]
    fn mid_uses_book_then_last() {
        let quotes = vec![
            call(100.0, 10).with_bid_ask(4.0, 5.0).with_last(9.0),
            call(105.0, 10).with_last(3.0),
        ];
        let (kept, report) = QuoteFilter::default().apply(&quotes, date(10)).unwrap();
        assert_abs_diff_eq!(kept[0].price, 4.5, epsilon = 1e-15);
        assert_abs_diff_eq!(kept[1].price, 3.0, epsilon = 1e-15);
        assert_eq!(report.mid_fallback, 1);
    }

    #[test]
    fn strict_field_missing_is_counted() {
        let quotes = vec![
            call(100.0, 10).with_last(5.0),
            call(105.0, 10).with_bid_ask(2.0, 2.5),
        ];
        let filter = QuoteFilter::new(PriceMethod::Bid, None);
        let (kept, report) = filter.apply(&quotes, date(10)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(report.missing_price, 1);
    }

    #[test]
    fn non_positive_and_nan_prices_removed() {
        let quotes = vec![
            call(95.0, 10).with_last(0.0),
            call(100.0, 10).with_last(f64::NAN),
            call(105.0, 10).with_last(2.0),
        ];
        let filter = QuoteFilter::new(PriceMethod::Last, None);
        let (kept, report) = filter.apply(&quotes, date(10)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(report.non_positive_price, 2);
    }

    #[test]
    fn duplicate_strikes_keep_most_liquid() {
        let quotes = vec![
            call(100.0, 10).with_last(5.0).with_volume(10.0),
            call(100.0, 10).with_last(5.2).with_volume(50.0),
        ];
        let filter = QuoteFilter::new(PriceMethod::Last, None);
        let (kept, report) = filter.apply(&quotes, date(10)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(report.duplicate, 1);
        assert_abs_diff_eq!(kept[0].price, 5.2, epsilon = 1e-15);
    }

    #[test]
    fn empty_result_is_insufficient_data() {
        let quotes = vec![call(100.0, 1).with_last(5.0)];
        let filter = QuoteFilter::new(PriceMethod::Last, Some(2));
        let err = filter.apply(&quotes, date(10)).unwrap_err();
        assert!(matches!(err, VolProbError::InsufficientData { available: 0, .. }));
    }

    #[test]
    fn otm_selection_picks_puts_below_forward() {
        let mk = |k: f64, ot: OptionType| PricedQuote {
            quote: OptionQuote::new(k, expiry(), ot, date(10)),
            price: 1.0,
        };
        let quotes = vec![
            mk(90.0, OptionType::Call),
            mk(90.0, OptionType::Put),
            mk(110.0, OptionType::Put),
            mk(110.0, OptionType::Call),
            mk(120.0, OptionType::Put),
        ];
        let otm = select_otm(&quotes, 100.0);
        let picked: Vec<(f64, OptionType)> = otm
            .iter()
            .map(|q| (q.quote.strike, q.quote.option_type))
            .collect();
        assert_eq!(
            picked,
            vec![
                (90.0, OptionType::Put),
                (110.0, OptionType::Call),
                (120.0, OptionType::Put),
            ]
        );
    }

    #[test]
    fn parity_forward_from_pairs() {
        let (f, df) = (102.0, 0.99);
        let mut quotes = Vec::new();
        for k in [95.0, 100.0, 105.0] {
            let c = 6.0;
            quotes.push(PricedQuote {
                quote: OptionQuote::new(k, expiry(), OptionType::Call, date(10)),
                price: c,
            });
            quotes.push(PricedQuote {
                quote: OptionQuote::new(k, expiry(), OptionType::Put, date(10)),
                price: c - df * (f - k),
            });
        }
        let fwd = parity_forward(&quotes, 100.0, df).unwrap();
        assert_abs_diff_eq!(fwd, f, epsilon = 1e-10);
        assert!(parity_forward(&quotes[..1], 100.0, df).is_none());
    }

    #[test]
    fn weighting_handles_missing_liquidity() {
        let q = call(100.0, 10).with_volume(250.0);
        assert_eq!(WeightingScheme::Uniform.raw_weight(&q), 1.0);
        assert_eq!(WeightingScheme::Volume.raw_weight(&q), 250.0);
        assert_eq!(WeightingScheme::OpenInterest.raw_weight(&q), 1.0);
    }
}
