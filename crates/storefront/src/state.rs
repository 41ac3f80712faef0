//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::db::{OrderStore, ProductCatalog};
use crate::images::{ImageService, ImageTransformer};
use crate::middleware::RateLimiter;
use crate::payment::PaymentGateway;
use crate::services::{CheckoutService, NotificationQueue, PriceResolver, SettlementService};
use crate::storage::ObjectStore;

/// External collaborators the storefront is wired to.
///
/// `main` builds these from Postgres, the filesystem and the payment
/// gateway; tests substitute in-memory fakes.
pub struct Collaborators {
    pub catalog: Arc<dyn ProductCatalog>,
    pub orders: Arc<dyn OrderStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub objects: Arc<dyn ObjectStore>,
    pub transformer: Arc<dyn ImageTransformer>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub notifications: NotificationQueue,
    /// Pinged by the readiness probe; `None` when running without Postgres.
    pub pool: Option<PgPool>,
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: Option<PgPool>,
    resolver: PriceResolver,
    checkout: CheckoutService,
    settlement: SettlementService,
    images: ImageService,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    /// Wire services to their collaborators.
    #[must_use]
    pub fn new(config: StorefrontConfig, c: Collaborators) -> Self {
        let resolver = PriceResolver::new(c.catalog);
        let checkout = CheckoutService::new(
            resolver.clone(),
            Arc::clone(&c.orders),
            Arc::clone(&c.gateway),
            config.payment.callback_url.clone(),
        );
        let settlement = SettlementService::new(c.orders, c.gateway, c.notifications);
        let images = ImageService::new(c.objects, c.transformer, &config.images);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool: c.pool,
                resolver,
                checkout,
                settlement,
                images,
                rate_limiter: c.rate_limiter,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }

    #[must_use]
    pub fn resolver(&self) -> &PriceResolver {
        &self.inner.resolver
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutService {
        &self.inner.checkout
    }

    #[must_use]
    pub fn settlement(&self) -> &SettlementService {
        &self.inner.settlement
    }

    #[must_use]
    pub fn images(&self) -> &ImageService {
        &self.inner.images
    }

    #[must_use]
    pub fn rate_limiter(&self) -> Arc<dyn RateLimiter> {
        Arc::clone(&self.inner.rate_limiter)
    }
}
