//! Currencies, shipping policy and money arithmetic.
//!
//! All amounts are [`Decimal`] in the currency's standard unit (lira, euro),
//! rounded half away from zero to two places at every boundary where a value
//! is shown to a customer or persisted.

use core::fmt;
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Round a monetary amount to two decimal places.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Currencies the store sells in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Turkish lira.
    #[default]
    Try,
    /// Euro.
    Eur,
}

/// Error returned when parsing an unsupported currency code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported currency: {0}")]
pub struct UnsupportedCurrency(pub String);

impl Currency {
    /// ISO 4217 code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Try => "TRY",
            Self::Eur => "EUR",
        }
    }

    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Try => "₺",
            Self::Eur => "€",
        }
    }

    /// Flat-fee shipping policy for this currency.
    ///
    /// These values are a fixed lookup and are never stored per order.
    #[must_use]
    pub const fn shipping_policy(self) -> ShippingPolicy {
        match self {
            Self::Try => ShippingPolicy {
                free_threshold: Decimal::from_parts(500, 0, 0, false, 0),
                flat_fee: Decimal::from_parts(2990, 0, 0, false, 2),
            },
            Self::Eur => ShippingPolicy {
                free_threshold: Decimal::from_parts(50, 0, 0, false, 0),
                flat_fee: Decimal::from_parts(490, 0, 0, false, 2),
            },
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = UnsupportedCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRY" => Ok(Self::Try),
            "EUR" => Ok(Self::Eur),
            _ => Err(UnsupportedCurrency(s.to_owned())),
        }
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Currency {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Currency {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(s.parse()?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Currency {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.code(), buf)
    }
}

/// Free-shipping threshold and flat fee for one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingPolicy {
    /// Subtotal at or above which shipping is free.
    pub free_threshold: Decimal,
    /// Fee charged below the threshold.
    pub flat_fee: Decimal,
}

impl ShippingPolicy {
    /// Shipping cost for a cart with the given (pre-discount) subtotal.
    #[must_use]
    pub fn cost_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal >= self.free_threshold {
            Decimal::ZERO
        } else {
            self.flat_fee
        }
    }
}

/// Server-computed order totals.
///
/// Build with [`OrderTotals::compute`], which enforces `discount <= subtotal`
/// and `total = round(subtotal - discount + shipping)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// Compute totals from a subtotal, a requested discount and the currency's
    /// shipping policy. The discount is clamped to `[0, subtotal]`.
    #[must_use]
    pub fn compute(subtotal: Decimal, requested_discount: Decimal, currency: Currency) -> Self {
        let subtotal = round_money(subtotal);
        let discount = round_money(requested_discount.max(Decimal::ZERO).min(subtotal));
        let shipping = currency.shipping_policy().cost_for(subtotal);
        let total = round_money(subtotal - discount + shipping);

        Self {
            subtotal,
            discount,
            shipping,
            total,
        }
    }

    /// Whether a client-computed total is within one cent of the server total.
    #[must_use]
    pub fn matches_client_total(&self, client_total: Decimal) -> bool {
        (self.total - client_total).abs() <= Decimal::new(1, 2)
    }
}
