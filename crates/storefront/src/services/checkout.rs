//! Checkout start: price the cart, open a pending order, get a gateway token.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument};

use kumas_core::{CustomerId, Email, OrderId};

use super::pricing::{CartRequest, PriceResolver, PricedCart, PricingError};
use crate::db::{OrderStore, RepositoryError};
use crate::models::{NewOrder, NewOrderItem};
use crate::payment::{BasketItem, Buyer, CheckoutFormRequest, GatewayError, PaymentGateway};

/// Identity number the gateway accepts for customers without a Turkish ID.
const DEFAULT_IDENTITY_NUMBER: &str = "11111111111";

/// Buyer details collected on the checkout form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    pub name: String,
    pub surname: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub identity_number: Option<String>,
    pub address: String,
    pub city: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub zip_code: Option<String>,
}

fn default_country() -> String {
    "Turkey".to_string()
}

/// Body of `POST /api/checkout/start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStartRequest {
    #[serde(flatten)]
    pub cart: CartRequest,
    pub customer: CustomerDetails,
}

/// A started checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutStarted {
    pub order_id: OrderId,
    pub token: String,
    pub payment_page_url: Option<String>,
}

/// Why a checkout could not be started.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// Customer details are unusable.
    #[error("{0}")]
    InvalidCustomer(String),

    /// The gateway refused to issue a token; the order was marked failed.
    #[error("payment gateway error: {source}")]
    Gateway {
        order_id: OrderId,
        #[source]
        source: GatewayError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Split "Ayşe Nur Yılmaz" into ("Ayşe Nur", "Yılmaz").
fn split_name(full: &str) -> (String, String) {
    let full = full.trim();
    match full.rsplit_once(char::is_whitespace) {
        Some((first, last)) => (first.trim().to_string(), last.to_string()),
        None => (full.to_string(), full.to_string()),
    }
}

/// Starts checkouts.
#[derive(Clone)]
pub struct CheckoutService {
    resolver: PriceResolver,
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    callback_url: String,
}

impl CheckoutService {
    #[must_use]
    pub fn new(
        resolver: PriceResolver,
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        callback_url: String,
    ) -> Self {
        Self {
            resolver,
            orders,
            gateway,
            callback_url,
        }
    }

    /// Start a checkout for `request` on behalf of the client at `client_ip`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Pricing`] for a rejected cart,
    /// [`CheckoutError::InvalidCustomer`] for unusable buyer details and
    /// [`CheckoutError::Gateway`] when no token could be issued.
    #[instrument(skip(self, request, client_ip), fields(order_id))]
    pub async fn start(
        &self,
        mut request: CheckoutStartRequest,
        customer_id: Option<CustomerId>,
        client_ip: &str,
    ) -> Result<CheckoutStarted, CheckoutError> {
        let customer = &request.customer;
        let email = Email::parse(&customer.email)
            .map_err(|e| CheckoutError::InvalidCustomer(e.to_string()))?;
        if customer.name.trim().is_empty()
            || customer.address.trim().is_empty()
            || customer.city.trim().is_empty()
        {
            return Err(CheckoutError::InvalidCustomer(
                "name, address and city are required".to_string(),
            ));
        }

        // Coupon per-customer limits are checked against the buyer's email.
        request.cart.email = Some(email.as_str().to_string());
        let priced = self.resolver.resolve(&request.cart).await?;
        let customer = request.customer;

        let (name, surname) = match customer.surname.as_deref().map(str::trim) {
            Some(surname) if !surname.is_empty() => {
                (customer.name.trim().to_string(), surname.to_string())
            }
            _ => split_name(&customer.name),
        };
        let full_name = format!("{name} {surname}");

        let conversation_id = uuid::Uuid::new_v4().to_string();
        let order = self
            .orders
            .create_pending(NewOrder {
                conversation_id: conversation_id.clone(),
                totals: priced.totals,
                currency: priced.currency,
                coupon_code: priced.coupon.as_ref().map(|c| c.code.clone()),
                customer_id,
                customer_email: email.clone(),
                customer_name: full_name,
                items: priced.lines.iter().map(NewOrderItem::from).collect(),
            })
            .await?;
        tracing::Span::current().record("order_id", tracing::field::display(order.id));

        let form_request = CheckoutFormRequest {
            conversation_id,
            basket_id: order.id.to_string(),
            price: priced.totals.subtotal,
            paid_price: priced.totals.total,
            currency: priced.currency,
            callback_url: self.callback_url.clone(),
            buyer: Buyer {
                id: customer_id.map_or_else(|| email.as_str().to_string(), |id| id.to_string()),
                name,
                surname,
                email: email.into_inner(),
                phone: customer.phone,
                identity_number: customer
                    .identity_number
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_IDENTITY_NUMBER.to_string()),
                address: customer.address,
                city: customer.city,
                country: customer.country,
                zip_code: customer.zip_code,
                ip: client_ip.to_string(),
            },
            items: basket_items(&priced),
        };

        let form = match self.gateway.initialize_checkout(&form_request).await {
            Ok(form) => form,
            Err(source) => {
                error!(error = %source, "Gateway refused checkout form");
                if let Err(e) = self
                    .orders
                    .mark_payment_failed(order.id, &source.customer_message())
                    .await
                {
                    error!(error = %e, "Failed to mark order payment_failed");
                }
                return Err(CheckoutError::Gateway {
                    order_id: order.id,
                    source,
                });
            }
        };

        self.orders
            .attach_payment_token(order.id, &form.token)
            .await?;
        info!(total = %order.total, currency = %order.currency, "Checkout started");

        Ok(CheckoutStarted {
            order_id: order.id,
            token: form.token,
            payment_page_url: form.payment_page_url,
        })
    }
}

fn basket_items(priced: &PricedCart) -> Vec<BasketItem> {
    priced
        .lines
        .iter()
        .enumerate()
        .map(|(index, line)| BasketItem {
            id: format!("{}-{index}", line.id),
            name: line.variant_name.as_ref().map_or_else(
                || line.name.clone(),
                |variant| format!("{} - {variant}", line.name),
            ),
            category: "Kumaş".to_string(),
            price: line.line_total,
        })
        .collect()
}
