//! Per-client rate limiting.
//!
//! Limits are keyed by client IP and request path. The shared limiter keeps
//! fixed-window counters in Postgres so every instance sees the same counts;
//! when Postgres errors, the in-process `governor` limiter takes over.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, header::RETRY_AFTER, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, warn};

/// Keys kept by the in-memory limiter before stale ones are swept.
const MEMORY_SWEEP_THRESHOLD: usize = 10_000;

/// Errors from a rate limiter backend.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Counts requests per key.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record one request for `key` and decide whether it may proceed.
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError>;
}

// =============================================================================
// Postgres fixed window
// =============================================================================

/// Fixed-window counters in the `rate_limit_counters` table.
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
    max_requests: u32,
    window: Duration,
}

impl PgRateLimiter {
    #[must_use]
    pub const fn new(pool: PgPool, max_requests: u32, window: Duration) -> Self {
        Self {
            pool,
            max_requests,
            window,
        }
    }
}

/// Start of the fixed window containing `now`, and the time left in it.
fn window_bounds(now: DateTime<Utc>, window: Duration) -> (DateTime<Utc>, Duration) {
    let len = i64::try_from(window.as_secs().max(1)).unwrap_or(i64::MAX);
    let secs = now.timestamp();
    let start_secs = secs - secs.rem_euclid(len);
    let start = DateTime::from_timestamp(start_secs, 0).unwrap_or(now);
    let left = (start_secs + len - secs).max(1);
    (start, Duration::from_secs(u64::try_from(left).unwrap_or(1)))
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        let (window_start, retry_after) = window_bounds(Utc::now(), self.window);

        let count: i32 = sqlx::query_scalar(
            r"
            INSERT INTO rate_limit_counters (key, window_start, count)
            VALUES ($1, $2, 1)
            ON CONFLICT (key, window_start)
            DO UPDATE SET count = rate_limit_counters.count + 1
            RETURNING count
            ",
        )
        .bind(key)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        if i64::from(count) > i64::from(self.max_requests) {
            Ok(RateLimitDecision::Limited { retry_after })
        } else {
            Ok(RateLimitDecision::Allowed)
        }
    }
}

/// Delete counters for windows that started before `before`.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub async fn prune_counters(pool: &PgPool, before: DateTime<Utc>) -> Result<u64, RateLimitError> {
    let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start < $1")
        .bind(before)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// =============================================================================
// In-memory (governor)
// =============================================================================

/// Single-process limiter. Counts reset on restart and are not shared
/// between instances.
pub struct InMemoryRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl InMemoryRateLimiter {
    /// `max_requests` per `window`, with bursts up to `max_requests`.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            limiter: governor::RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        if self.limiter.len() > MEMORY_SWEEP_THRESHOLD {
            self.limiter.retain_recent();
        }

        Ok(match self.limiter.check_key(&key.to_string()) {
            Ok(()) => RateLimitDecision::Allowed,
            Err(not_until) => RateLimitDecision::Limited {
                retry_after: not_until.wait_time_from(self.clock.now()),
            },
        })
    }
}

// =============================================================================
// Fallback
// =============================================================================

/// Uses `primary`, degrading to `fallback` whenever `primary` errors.
pub struct FallbackRateLimiter {
    primary: Arc<dyn RateLimiter>,
    fallback: Arc<dyn RateLimiter>,
}

impl FallbackRateLimiter {
    #[must_use]
    pub fn new(primary: Arc<dyn RateLimiter>, fallback: Arc<dyn RateLimiter>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl RateLimiter for FallbackRateLimiter {
    async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimitError> {
        match self.primary.check(key).await {
            Ok(decision) => Ok(decision),
            Err(e) => {
                warn!(error = %e, "Shared rate limiter unavailable, using in-memory limiter");
                self.fallback.check(key).await
            }
        }
    }
}

// =============================================================================
// Client IP extraction for Cloudflare + Fly.io
// =============================================================================

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Real client IP: Cloudflare's `CF-Connecting-IP` first, then the usual
/// proxy headers, then the socket peer.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    ["cf-connecting-ip", "x-forwarded-for", "x-real-ip", "fly-client-ip"]
        .into_iter()
        .find_map(|name| header_ip(headers, name))
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// Extractor for the client IP, `"unknown"` when none can be determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(
            client_ip(&parts.headers, peer).map_or_else(|| "unknown".to_string(), |ip| ip.to_string()),
        ))
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Middleware limiting requests per client IP and path.
///
/// Limiter errors fail open: the request proceeds and the error is logged.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<dyn RateLimiter>>,
    ClientIp(ip): ClientIp,
    request: Request,
    next: Next,
) -> Response {
    let key = format!("{ip}:{}", request.uri().path());

    match limiter.check(&key).await {
        Ok(RateLimitDecision::Allowed) => next.run(request).await,
        Ok(RateLimitDecision::Limited { retry_after }) => {
            warn!(client_ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            let secs = retry_after.as_secs().max(1).to_string();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, secs)],
                Json(json!({ "error": "Too many requests, please try again later" })),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Rate limiter failed");
            next.run(request).await
        }
    }
}
