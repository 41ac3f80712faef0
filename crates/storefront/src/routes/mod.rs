//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                  - Liveness
//! GET  /health/ready            - Readiness (database ping)
//!
//! # Checkout (rate limited)
//! POST /api/checkout/validate   - Price a cart from the catalog
//! POST /api/checkout/start      - Create a pending order, get a gateway token
//!
//! # Payment
//! POST /api/payment/callback    - Gateway callback (form body `token`)
//! GET  /api/payment/callback    - Gateway callback (query `token`)
//!
//! # Images
//! GET  /images/{*path}          - Derived variant (w, h, fit, crop, q, fm, bg) or video
//! POST /api/images/upload       - Multipart upload (rate limited)
//! ```

pub mod checkout;
pub mod health;
pub mod images;
pub mod payment;

use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::middleware::{rate_limit_middleware, request_id_middleware};
use crate::state::AppState;

/// Multipart framing allowance on top of the upload ceiling.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Routes subject to per-client rate limiting.
fn limited_routes(state: &AppState) -> Router<AppState> {
    let body_limit = state
        .images()
        .upload_max_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/api/checkout/validate", post(checkout::validate))
        .route("/api/checkout/start", post(checkout::start))
        .route(
            "/api/images/upload",
            post(images::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter(),
            rate_limit_middleware,
        ))
}

/// Build the complete application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route(
            "/api/payment/callback",
            post(payment::callback_post).get(payment::callback_get),
        )
        .route("/images/{*path}", get(images::get_image))
        .merge(limited_routes(&state))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        .with_state(state)
}
