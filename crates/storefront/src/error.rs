//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. JSON route handlers return `Result<T, AppError>`;
//! the payment callback never does, since every outcome there is a redirect.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::images::ImageError;
use crate::services::{CheckoutError, PricingError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Checkout could not be started.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// Image lookup, derivation or upload failed.
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Checkout(err) => match err {
                CheckoutError::Pricing(PricingError::Rejected(_))
                | CheckoutError::InvalidCustomer(_) => StatusCode::BAD_REQUEST,
                CheckoutError::Gateway { .. } => StatusCode::BAD_GATEWAY,
                CheckoutError::Pricing(PricingError::Repository(_))
                | CheckoutError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Image(err) => match err {
                ImageError::NotFound(_) => StatusCode::NOT_FOUND,
                err if err.is_client_error() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let body = match &self {
            Self::Checkout(CheckoutError::Pricing(PricingError::Rejected(errors))) => {
                json!({ "error": "Cart rejected", "errors": errors })
            }
            Self::Checkout(CheckoutError::InvalidCustomer(msg)) => json!({ "error": msg }),
            Self::Checkout(CheckoutError::Gateway { source, .. }) => {
                json!({ "error": source.customer_message() })
            }
            Self::Image(ImageError::NotFound(_)) => json!({ "error": "Not found" }),
            Self::Image(err) if err.is_client_error() => json!({ "error": err.to_string() }),
            Self::BadRequest(_) => json!({ "error": self.to_string() }),
            _ => json!({ "error": "Internal server error" }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for a step in a request.
///
/// Breadcrumbs appear in Sentry error reports to show the trail leading up
/// to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}
