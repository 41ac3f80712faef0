//! Coupon discount arithmetic.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::price::round_money;

/// How a coupon's `discount_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `discount_value` is a percentage of the subtotal (0-100).
    Percentage,
    /// `discount_value` is a fixed amount in the order currency.
    Fixed,
}

/// Error returned when a stored discount type is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown discount type: {0}")]
pub struct UnknownDiscountKind(pub String);

impl DiscountKind {
    /// Amount taken off `subtotal`, never more than the subtotal itself.
    ///
    /// ```
    /// use kumas_core::DiscountKind;
    /// use rust_decimal::Decimal;
    ///
    /// let off = DiscountKind::Fixed.amount_off(Decimal::new(80, 0), Decimal::new(50, 0));
    /// assert_eq!(off, Decimal::new(50, 0));
    /// ```
    #[must_use]
    pub fn amount_off(self, value: Decimal, subtotal: Decimal) -> Decimal {
        let raw = match self {
            Self::Percentage => subtotal * value.min(Decimal::ONE_HUNDRED) / Decimal::ONE_HUNDRED,
            Self::Fixed => value,
        };
        round_money(raw.max(Decimal::ZERO).min(subtotal))
    }

    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscountKind {
    type Err = UnknownDiscountKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" | "percent" => Ok(Self::Percentage),
            "fixed" | "fixed_amount" => Ok(Self::Fixed),
            other => Err(UnknownDiscountKind(other.to_owned())),
        }
    }
}
