use crate::error::{PaymentError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of fractional digits every stored amount carries.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// A strictly positive monetary amount rounded to minor-unit precision.
///
/// Construction rounds half away from zero to two decimals and rescales so the
/// value always prints with exactly two fractional digits (`500` becomes
/// `500.00`). Amounts that round to zero are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        let mut rounded =
            value.round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(MINOR_UNIT_SCALE);
        if rounded > Decimal::ZERO {
            Ok(Self(rounded))
        } else {
            Err(PaymentError::InvalidAmount(value.to_string()))
        }
    }

    /// Parses a textual amount such as `"19.99"` or `"1e3"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let value = Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map_err(|_| PaymentError::InvalidAmount(raw.to_string()))?;
        Self::new(value)
    }

    /// Accepts a JSON number or a numeric string; anything else is invalid.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Number(number) => Self::parse(&number.to_string()),
            serde_json::Value::String(text) => Self::parse(text),
            other => Err(PaymentError::InvalidAmount(other.to_string())),
        }
    }

    /// Builds an amount from an integer count of minor units (cents).
    pub fn from_minor_units(units: i64) -> Result<Self> {
        Self::new(Decimal::new(units, MINOR_UNIT_SCALE))
    }

    /// Integer minor units (cents) for vendors that take them.
    ///
    /// Fails with `InvalidAmount` when the value does not fit in an `i64`.
    pub fn to_minor_units(&self) -> Result<i64> {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|units| units.to_i64())
            .ok_or_else(|| PaymentError::InvalidAmount(self.0.to_string()))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rescales a decimal total (refund sums, balances) for display and storage.
pub fn to_minor_precision(value: Decimal) -> Decimal {
    let mut rounded =
        value.round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MINOR_UNIT_SCALE);
    rounded
}

/// An upper-cased ISO 4217 currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code))
        } else {
            Err(PaymentError::Validation(format!(
                "Invalid currency code: {raw}"
            )))
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// Lower-cased form some vendors expect on the wire.
    pub fn lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl TryFrom<String> for Currency {
    type Error = PaymentError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(PaymentError::InvalidAmount(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(PaymentError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_amount_rounds_half_away_from_zero() {
        assert_eq!(Amount::new(dec!(10.005)).unwrap().value(), dec!(10.01));
        assert_eq!(Amount::new(dec!(10.004)).unwrap().value(), dec!(10.00));
        assert!(Amount::new(dec!(0.004)).is_err());
    }

    #[test]
    fn test_amount_always_prints_two_decimals() {
        assert_eq!(Amount::parse("500").unwrap().to_string(), "500.00");
        assert_eq!(Amount::parse(" 19.9 ").unwrap().to_string(), "19.90");
    }

    #[test]
    fn test_amount_from_json() {
        assert_eq!(
            Amount::from_json(&json!(19.99)).unwrap().value(),
            dec!(19.99)
        );
        assert_eq!(
            Amount::from_json(&json!("500.00")).unwrap().value(),
            dec!(500.00)
        );
        assert!(Amount::from_json(&json!("abc")).is_err());
        assert!(Amount::from_json(&json!(null)).is_err());
        assert!(Amount::from_json(&json!(true)).is_err());
    }

    #[test]
    fn test_minor_units() {
        let amount = Amount::parse("19.99").unwrap();
        assert_eq!(amount.to_minor_units().unwrap(), 1999);
        assert_eq!(Amount::from_minor_units(1999).unwrap(), amount);
        assert!(Amount::from_minor_units(0).is_err());
    }

    #[test]
    fn test_minor_units_out_of_range() {
        let huge = Amount::parse("79228162514264337593543950335").unwrap();
        assert!(matches!(
            huge.to_minor_units(),
            Err(PaymentError::InvalidAmount(_))
        ));
        let beyond_i64 = Amount::parse("100000000000000000000").unwrap();
        assert!(matches!(
            beyond_i64.to_minor_units(),
            Err(PaymentError::InvalidAmount(_))
        ));
        assert_eq!(
            Amount::parse("92233720368547758.07")
                .unwrap()
                .to_minor_units()
                .unwrap(),
            i64::MAX
        );
    }

    #[test]
    fn test_currency_normalization() {
        assert_eq!(Currency::parse(" usd ").unwrap().code(), "USD");
        assert_eq!(Currency::parse("PHP").unwrap().lowercase(), "php");
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("U$D").is_err());
    }
}
