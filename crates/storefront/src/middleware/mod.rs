//! HTTP middleware stack for the storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, transactions)
//! 2. `TraceLayer` (request span with `request_id` field)
//! 3. Request ID (propagate or generate `x-request-id`)
//! 4. Rate limiting (checkout and upload routes only)

pub mod rate_limit;
pub mod request_id;

pub use rate_limit::{
    ClientIp, FallbackRateLimiter, InMemoryRateLimiter, PgRateLimiter, RateLimitDecision,
    RateLimitError, RateLimiter, rate_limit_middleware,
};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
