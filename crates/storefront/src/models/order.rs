//! Order types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kumas_core::{
    Currency, CustomerId, Email, OrderId, OrderItemId, OrderStatus, OrderTotals, ProductId,
    VariantId,
};

/// A persisted order.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    /// Opaque checkout-form token issued by the gateway, unique per attempt.
    pub payment_token: Option<String>,
    /// Correlator sent to the gateway with the token request.
    pub conversation_id: String,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub currency: Currency,
    pub coupon_code: Option<String>,
    /// Authenticated customer, `None` for guest checkout.
    pub customer_id: Option<CustomerId>,
    pub customer_email: String,
    pub customer_name: String,
    /// Gateway payment metadata, captured only on success.
    pub payment_data: Option<serde_json::Value>,
    /// Gateway error message, captured on failure.
    pub payment_error: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Set once every line's stock movement has been recorded.
    pub stock_applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub variant_name: Option<String>,
    /// Positive, possibly fractional (metres of fabric).
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Parameters for creating a pending order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub conversation_id: String,
    pub totals: OrderTotals,
    pub currency: Currency,
    pub coupon_code: Option<String>,
    pub customer_id: Option<CustomerId>,
    pub customer_email: Email,
    pub customer_name: String,
    pub items: Vec<NewOrderItem>,
}

/// Parameters for one order line.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub product_name: String,
    pub variant_name: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Payment metadata stored on the order as an opaque JSON blob once the
/// gateway confirms success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub payment_id: Option<String>,
    pub paid_price: Option<Decimal>,
    pub installment: Option<i32>,
    pub card_association: Option<String>,
    pub card_family: Option<String>,
    pub bin_number: Option<String>,
    pub last_four_digits: Option<String>,
    /// Gateway fraud flag (1 = ok, 0 = review, -1 = rejected).
    pub fraud_status: Option<i32>,
}

impl PaymentDetails {
    /// JSON representation for the `payment_data` column.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
