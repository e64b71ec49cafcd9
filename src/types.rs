//! Core value types shared across the pipeline.
//!
//! Outputs that are easy to confuse wrap `f64` in a newtype: [`Vol`] is an
//! annualized standard deviation, [`Variance`] is total variance `σ²T`.
//! Inputs stay bare `f64` and are checked where they enter a model.
//!
//! These types wrap `f64`, so only `PartialEq`/`PartialOrd` are derived.

use serde::{Deserialize, Serialize};

/// Implied volatility `σ`, measured as annualized standard deviation.
///
/// # Examples
/// ```
/// use volprob::types::Vol;
/// let vol = Vol(0.25);
/// assert_eq!(vol.0, 0.25);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Vol(pub f64);

/// Total implied variance `σ²T`.
///
/// Smile models are fitted in total-variance space because calendar
/// no-arbitrage is a monotonicity condition on it.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Variance(pub f64);

/// Option type: call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// Right to buy at strike price.
    Call,
    /// Right to sell at strike price.
    Put,
}

impl OptionType {
    /// `+1` for calls, `−1` for puts.
    pub fn sign(self) -> f64 {
        match self {
            OptionType::Call => 1.0,
            OptionType::Put => -1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_type_sign() {
        assert_eq!(OptionType::Call.sign(), 1.0);
        assert_eq!(OptionType::Put.sign(), -1.0);
    }

    #[test]
    fn option_type_serializes_lowercase() {
        let json = serde_json::to_string(&OptionType::Put).unwrap();
        assert_eq!(json, "\"put\"");
        let back: OptionType = serde_json::from_str("\"call\"").unwrap();
        assert_eq!(back, OptionType::Call);
    }
}
