//! Amount type for handling monetary values with optional currency symbols.
//!
//! This module provides the `Amount` type which wraps `Decimal` and handles parsing values that
//! may or may not include a currency symbol (`¥`, `￥` or `$`) and thousands separators.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

const CURRENCY_SYMBOLS: &[char] = &['¥', '￥', '$'];

/// Represents how amounts were (or should be) formatted.
///
/// # Examples
///  - `AmountFormat{ currency: Some('¥'), commas: true }` -> `-¥60,000`
///  - `AmountFormat{ currency: None, commas: true }` -> `-60,000`
///  - `AmountFormat{ currency: None, commas: false }` -> `-60000`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AmountFormat {
    /// The currency symbol found in front of the number, if any.
    currency: Option<char>,
    /// Whether commas are present as thousands separators in the formatting.
    commas: bool,
}

impl AmountFormat {
    pub const fn new(currency: Option<char>, commas: bool) -> Self {
        Self { currency, commas }
    }
}

/// Represents a currency amount from a sales row.
///
/// Formatting is considered significant for the purposes of equality, so for numeric comparisons
/// and sums you should access the `Decimal` value and use that.
///
/// ```
/// # use sales_sync::model::Amount;
/// # use std::str::FromStr;
/// let a = Amount::from_str("12000").unwrap();
/// let b = Amount::from_str("¥12,000").unwrap();
/// assert_ne!(a, b);
/// assert_eq!(a.value(), b.value());
/// assert_eq!(b.to_string(), "¥12,000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount {
    /// The parsed numerical value.
    value: Decimal,
    /// The way the numerical value was parsed from, or should be written to, a `String`.
    format: AmountFormat,
}

impl Amount {
    /// Creates a new Amount from a Decimal value with plain formatting.
    pub const fn new(value: Decimal) -> Self {
        Self {
            value,
            format: AmountFormat {
                currency: None,
                commas: false,
            },
        }
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.value
    }

    /// Returns the same value with a different display format.
    pub fn with_format(self, format: AmountFormat) -> Self {
        Self { format, ..self }
    }

    pub fn is_negative(&self) -> bool {
        self.value().is_sign_negative() && !self.value().is_zero()
    }
}

/// An error that can occur when parsing strings into `Amount` values.
pub struct AmountError(String);

impl Debug for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Error for AmountError {}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AmountError(String::from("An empty string is not an amount")));
        }

        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };

        // "-¥500" and "¥-500" are both seen in exported sheets
        let mut currency = None;
        let mut chars = unsigned.chars();
        let without_symbol = match chars.next() {
            Some(c) if CURRENCY_SYMBOLS.contains(&c) => {
                currency = Some(c);
                chars.as_str()
            }
            _ => unsigned,
        };
        let (negative, without_symbol) = match without_symbol.strip_prefix('-') {
            Some(rest) if !negative => (true, rest),
            _ => (negative, without_symbol),
        };

        let without_commas = without_symbol.replace(',', "");
        let commas = without_commas.len() < without_symbol.len();
        if without_commas.is_empty() || without_commas.starts_with(['+', '-']) {
            return Err(AmountError(format!("'{s}' is not a valid amount")));
        }
        if commas && !is_grouped_in_thousands(without_symbol) {
            return Err(AmountError(format!(
                "'{s}' is not a valid amount: commas must separate groups of three digits"
            )));
        }

        let value = Decimal::from_str(&without_commas)
            .map_err(|e| AmountError(format!("'{s}' is not a valid amount: {e}")))?;
        let value = if negative { -value } else { value };
        Ok(Amount {
            value,
            format: AmountFormat { currency, commas },
        })
    }
}

/// True for `1,234` and `12,345.67`, false for `1,2,3`, `1234,567` or `1,000.5,0`.
fn is_grouped_in_thousands(s: &str) -> bool {
    let (integer, fraction) = s.split_once('.').unwrap_or((s, ""));
    if fraction.contains(',') {
        return false;
    }
    let mut groups = integer.split(',');
    let first_ok = groups.next().is_some_and(|g| (1..=3).contains(&g.len()));
    first_ok && groups.all(|g| g.len() == 3)
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (sign, num) = if self.is_negative() {
            ("-", self.value().abs())
        } else {
            ("", self.value())
        };

        let symbol = self
            .format
            .currency
            .map(String::from)
            .unwrap_or_default();

        if self.format.commas {
            // format_num works on floats, so keep the scale of the parsed value
            let pattern = format!(",.{}f", num.scale());
            write!(
                f,
                "{sign}{symbol}{}",
                format_num::format_num!(pattern.as_str(), num.to_f64().unwrap_or_default())
            )
        } else {
            write!(f, "{sign}{symbol}{num}")
        }
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}
