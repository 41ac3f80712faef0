//! Checkout route handlers.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{error, instrument};

use kumas_core::Currency;

use crate::error::Result;
use crate::middleware::ClientIp;
use crate::models::Coupon;
use crate::services::pricing::PricedLine;
use crate::services::{CartRequest, CheckoutStartRequest, CheckoutStarted, PricedCart, PricingError};
use crate::state::AppState;

/// Body of a successful validation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,
    pub items: Vec<PricedLine>,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount: Decimal,
    pub coupon: Option<Coupon>,
    #[serde(with = "rust_decimal::serde::float")]
    pub shipping: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub currency: Currency,
    pub message: String,
}

impl From<PricedCart> for ValidationResponse {
    fn from(cart: PricedCart) -> Self {
        let message = cart.coupon.as_ref().map_or_else(
            || "Cart is valid".to_string(),
            |coupon| format!("Coupon {} applied", coupon.code),
        );

        Self {
            valid: true,
            items: cart.lines,
            subtotal: cart.totals.subtotal,
            discount: cart.totals.discount,
            coupon: cart.coupon,
            shipping: cart.totals.shipping,
            total: cart.totals.total,
            currency: cart.currency,
            message,
        }
    }
}

fn rejected(errors: Vec<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "valid": false, "errors": errors })),
    )
        .into_response()
}

/// `POST /api/checkout/validate`
///
/// Prices the cart from the catalog. Rejections are `400 {valid:false,
/// errors}`; storage failures are `500 {error, valid:false}`.
#[instrument(skip(state, payload))]
pub async fn validate(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CartRequest>, JsonRejection>,
) -> Response {
    let Json(cart) = match payload {
        Ok(cart) => cart,
        Err(rejection) => return rejected(vec![rejection.body_text()]),
    };

    match state.resolver().resolve(&cart).await {
        Ok(priced) => Json(ValidationResponse::from(priced)).into_response(),
        Err(PricingError::Rejected(errors)) => rejected(errors),
        Err(PricingError::Repository(e)) => {
            let event_id = sentry::capture_error(&e);
            error!(error = %e, sentry_event_id = %event_id, "Cart validation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to validate cart", "valid": false })),
            )
                .into_response()
        }
    }
}

/// `POST /api/checkout/start`
///
/// Creates a pending order and returns the gateway's checkout form token.
#[instrument(skip(state, request))]
pub async fn start(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<CheckoutStartRequest>,
) -> Result<Json<CheckoutStarted>> {
    let started = state.checkout().start(request, None, &ip).await?;
    Ok(Json(started))
}
