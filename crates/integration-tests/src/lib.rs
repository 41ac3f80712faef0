//! End-to-end tests for the Kumas storefront.
//!
//! Every test drives the real router in-process with `tower::ServiceExt`,
//! wired to the in-memory collaborators from the `test-util` feature. No
//! database, gateway or disk is needed.
//!
//! ```bash
//! cargo test -p kumas-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, header};
use chrono::Utc;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rust_decimal::Decimal;
use secrecy::SecretString;
use tower::ServiceExt;

use kumas_core::ProductId;
use kumas_storefront::config::{
    CheckoutConfig, ImageConfig, PaymentConfig, RateLimitBackend, RateLimitConfig, SentryConfig,
    StorefrontConfig,
};
use kumas_storefront::db::memory::MemoryStore;
use kumas_storefront::images::transform::{CountingTransformer, RasterTransformer};
use kumas_storefront::middleware::InMemoryRateLimiter;
use kumas_storefront::models::Product;
use kumas_storefront::payment::mock::MockGateway;
use kumas_storefront::services::NotificationQueue;
use kumas_storefront::services::notifications::RecordingNotifier;
use kumas_storefront::storage;
use kumas_storefront::{AppState, Collaborators};

pub const BASE_URL: &str = "https://kumas.test";
pub const SUCCESS_URL: &str = "https://kumas.test/checkout/success";
pub const ERROR_URL: &str = "https://kumas.test/checkout/error";

/// Configuration for an in-process storefront.
#[must_use]
pub fn test_config(max_requests: u32) -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://unused/kumas"),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        base_url: BASE_URL.to_string(),
        checkout: CheckoutConfig {
            success_url: SUCCESS_URL.to_string(),
            error_url: ERROR_URL.to_string(),
        },
        payment: PaymentConfig {
            api_key: SecretString::from("sandbox-api"),
            secret_key: SecretString::from("sandbox-secret"),
            base_url: "https://sandbox.example".to_string(),
            callback_url: format!("{BASE_URL}/api/payment/callback"),
        },
        images: ImageConfig {
            upload_max_bytes: 2 * 1024 * 1024,
            transform_timeout: Duration::from_secs(10),
            ..ImageConfig::default()
        },
        rate_limit: RateLimitConfig {
            backend: RateLimitBackend::Memory,
            max_requests,
            window: Duration::from_secs(60),
        },
        smtp: None,
        sentry: SentryConfig::default(),
    }
}

/// A storefront router plus handles on every fake behind it.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub objects: Arc<storage::MemoryStore>,
    pub transformer: Arc<CountingTransformer>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    /// App with a generous rate limit.
    pub fn new() -> Self {
        Self::with_rate_limit(1_000)
    }

    /// App allowing `max_requests` per client and path per minute.
    pub fn with_rate_limit(max_requests: u32) -> Self {
        let config = test_config(max_requests);
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let objects = Arc::new(storage::MemoryStore::new());
        let transformer = Arc::new(CountingTransformer::new(RasterTransformer));
        let notifier = Arc::new(RecordingNotifier::new());
        let (notifications, _worker) = NotificationQueue::start(notifier.clone(), 16);

        let state = AppState::new(
            config.clone(),
            Collaborators {
                catalog: store.clone(),
                orders: store.clone(),
                gateway: gateway.clone(),
                objects: objects.clone(),
                transformer: transformer.clone(),
                rate_limiter: Arc::new(InMemoryRateLimiter::new(
                    config.rate_limit.max_requests,
                    config.rate_limit.window,
                )),
                notifications,
                pool: None,
            },
        );

        Self {
            router: kumas_storefront::router(state),
            store,
            gateway,
            objects,
            transformer,
            notifier,
        }
    }

    /// Add an active TRY-priced product to the catalog.
    pub fn product(&self, name: &str, price: &str, sale_price: Option<&str>) -> Product {
        let product = Product {
            id: ProductId::random(),
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            is_active: true,
            price: dec(price),
            sale_price: sale_price.map(dec),
            price_eur: None,
            sale_price_eur: None,
            stock_quantity: Decimal::new(100, 0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert_product(product.clone());
        product
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: &serde_json::Value) -> Response<Body> {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn post_form(&self, uri: &str, body: &str) -> Response<Body> {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use]
pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// `Location` header of a redirect.
#[must_use]
pub fn location(response: &Response<Body>) -> String {
    assert!(
        response.status().is_redirection(),
        "expected redirect, got {}",
        response.status()
    );
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[must_use]
pub fn header_value(response: &Response<Body>, name: header::HeaderName) -> String {
    response
        .headers()
        .get(name)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

/// A gradient PNG.
#[must_use]
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([u8::try_from(x % 256).unwrap(), u8::try_from(y % 256).unwrap(), 120])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}
