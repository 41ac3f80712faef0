//! Payment gateway contract.
//!
//! The storefront relies on two gateway operations: issuing a hosted
//! checkout-form token for a pending order, and retrieving the outcome of
//! that form once the customer comes back through the callback. Everything
//! else about the gateway is its own business.

pub mod iyzico;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use kumas_core::Currency;

use crate::models::PaymentDetails;

pub use iyzico::IyzicoClient;

/// Errors that can occur when talking to the payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Gateway answered with `status: failure`.
    #[error("gateway error {code}: {message}")]
    Api { code: String, message: String },

    /// Response body could not be understood.
    #[error("parse error: {0}")]
    Parse(String),

    /// Request could not be signed.
    #[error("signing error: {0}")]
    Signing(String),
}

impl GatewayError {
    /// Message suitable for storing on the order and showing the customer.
    #[must_use]
    pub fn customer_message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::Http(_) | Self::Parse(_) | Self::Signing(_) => {
                "Payment provider is unavailable".to_string()
            }
        }
    }
}

/// Buyer identity and address sent with a checkout-form request.
#[derive(Debug, Clone)]
pub struct Buyer {
    pub id: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone: Option<String>,
    pub identity_number: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub zip_code: Option<String>,
    pub ip: String,
}

/// One basket line as the gateway sees it.
#[derive(Debug, Clone)]
pub struct BasketItem {
    pub id: String,
    pub name: String,
    pub category: String,
    /// Authoritative line total.
    pub price: Decimal,
}

/// Everything the gateway needs to issue a checkout form.
#[derive(Debug, Clone)]
pub struct CheckoutFormRequest {
    pub conversation_id: String,
    pub basket_id: String,
    /// Sum of basket item prices (pre-discount subtotal).
    pub price: Decimal,
    /// Amount actually charged (order total).
    pub paid_price: Decimal,
    pub currency: Currency,
    pub callback_url: String,
    pub buyer: Buyer,
    pub items: Vec<BasketItem>,
}

/// A hosted checkout form issued for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutForm {
    pub token: String,
    pub payment_page_url: Option<String>,
}

/// Outcome of a completed checkout form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Success(PaymentDetails),
    /// Card declined or otherwise refused, with the gateway's message.
    Failure(String),
}

/// Retrieved checkout-form result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    /// Conversation id echoed back by the gateway.
    pub conversation_id: Option<String>,
    pub status: PaymentStatus,
}

/// Hosted checkout-form payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Request a checkout-form token for a pending order.
    async fn initialize_checkout(
        &self,
        request: &CheckoutFormRequest,
    ) -> Result<CheckoutForm, GatewayError>;

    /// Retrieve the result of a checkout form.
    async fn retrieve_checkout(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<PaymentResult, GatewayError>;
}
