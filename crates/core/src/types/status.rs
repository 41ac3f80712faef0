//! Status enums and the order state machine.
//!
//! ```text
//!              ┌──────────► paid ──► preparing ──► shipped ──► delivered
//!   pending ───┤              │           │            │
//!              └──► payment_failed        └────────────┴──► cancelled
//! ```
//!
//! Settlement only ever moves an order out of `pending`. Every later edge is
//! an admin-driven fulfilment step.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created at checkout start; waiting for the gateway result.
    #[default]
    Pending,
    /// Gateway confirmed the payment.
    Paid,
    /// Gateway reported failure, or the gateway lookup itself errored.
    PaymentFailed,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
}

/// A transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal order transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownOrderStatus(pub String);

impl OrderStatus {
    /// Database / wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::PaymentFailed => "payment_failed",
            Self::Preparing => "preparing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the payment outcome of this order has been decided.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the order was paid at some point (it may have moved on to
    /// fulfilment since).
    #[must_use]
    pub const fn is_paid(self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Preparing | Self::Shipped | Self::Delivered
        )
    }

    /// Whether `self -> to` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Paid | Self::PaymentFailed)
                | (Self::Paid, Self::Preparing | Self::Cancelled)
                | (Self::Preparing, Self::Shipped | Self::Cancelled)
                | (Self::Shipped, Self::Delivered)
        )
    }

    /// Apply a transition, rejecting anything the state machine does not allow.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] when `self -> to` is not an edge. In
    /// particular a settled order can never be settled again.
    pub const fn transition(self, to: Self) -> Result<Self, IllegalTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownOrderStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "payment_failed" => Ok(Self::PaymentFailed),
            "preparing" => Ok(Self::Preparing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownOrderStatus(other.to_owned())),
        }
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for OrderStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for OrderStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(s.parse()?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for OrderStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Reason an inventory level changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockMovementKind {
    /// Stock left the warehouse because an order was paid.
    Sale,
    /// Manual correction by staff.
    Adjustment,
    /// Goods came back from a customer.
    Return,
}

impl StockMovementKind {
    /// Database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Adjustment => "adjustment",
            Self::Return => "return",
        }
    }
}

impl fmt::Display for StockMovementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::PaymentFailed,
        OrderStatus::Preparing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    #[test]
    fn test_pending_settles_either_way() {
        assert_eq!(
            OrderStatus::Pending.transition(OrderStatus::Paid),
            Ok(OrderStatus::Paid)
        );
        assert_eq!(
            OrderStatus::Pending.transition(OrderStatus::PaymentFailed),
            Ok(OrderStatus::PaymentFailed)
        );
    }

    #[test]
    fn test_settled_orders_cannot_be_settled_again() {
        for from in ALL.into_iter().filter(|s| s.is_settled()) {
            for to in [OrderStatus::Paid, OrderStatus::PaymentFailed] {
                let err = from.transition(to).unwrap_err();
                assert_eq!(err.from, from);
                assert_eq!(err.to, to);
            }
        }
    }

    #[test]
    fn test_payment_failed_is_terminal() {
        for to in ALL {
            assert!(!OrderStatus::PaymentFailed.can_transition_to(to));
        }
    }

    #[test]
    fn test_no_way_back_to_pending() {
        for from in ALL {
            assert!(!from.can_transition_to(OrderStatus::Pending));
        }
    }

    #[test]
    fn test_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PaymentFailed).unwrap();
        assert_eq!(json, "\"payment_failed\"");
    }

    #[test]
    fn test_is_paid() {
        assert!(OrderStatus::Paid.is_paid());
        assert!(OrderStatus::Shipped.is_paid());
        assert!(!OrderStatus::PaymentFailed.is_paid());
        assert!(!OrderStatus::Pending.is_paid());
        assert!(!OrderStatus::Cancelled.is_paid());
    }
}
