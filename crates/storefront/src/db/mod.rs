//! Database operations for the storefront `PostgreSQL` database.
//!
//! # Tables
//!
//! - `products`, `product_variants` - Authoritative prices and stock
//! - `coupons` - Discount codes, validated by the `validate_coupon` SQL function
//! - `orders`, `order_items` - Checkout attempts and their lines
//! - `stock_movements` - Inventory ledger, one `sale` row per paid order line
//! - `rate_limit_counters` - Fixed-window counters shared by every instance
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p kumas-cli -- migrate
//! ```
//!
//! Handlers and services talk to storage through the [`ProductCatalog`] and
//! [`OrderStore`] traits so tests can swap in the in-memory fakes from
//! [`memory`].

pub mod catalog;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use kumas_core::{OrderId, ProductId, VariantId};

use crate::models::{CouponCheck, NewOrder, Order, OrderItem, PaymentDetails, Product, ProductVariant};

pub use catalog::PgCatalog;
pub use orders::PgOrderStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate payment token).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Outcome of recording the sale movement for one order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockApplication {
    /// The movement was recorded and stock decremented.
    Applied,
    /// A movement for this line already exists; nothing changed.
    AlreadyRecorded,
}

/// Read access to products, variants and coupon rules.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetch every product whose id is in `ids`, in one round trip.
    /// Missing ids are simply absent from the result.
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError>;

    /// Fetch every variant whose id is in `ids`, in one round trip.
    async fn variants_by_ids(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<ProductVariant>, RepositoryError>;

    /// Ask storage whether `code` applies to a cart with this subtotal.
    async fn validate_coupon(
        &self,
        code: &str,
        subtotal: Decimal,
        email: Option<&str>,
    ) -> Result<CouponCheck, RepositoryError>;
}

/// Order persistence and the settlement side effects.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a `pending` order with its lines in one transaction.
    async fn create_pending(&self, order: NewOrder) -> Result<Order, RepositoryError>;

    /// Store the gateway token issued for a pending order.
    async fn attach_payment_token(&self, id: OrderId, token: &str) -> Result<(), RepositoryError>;

    async fn find_by_payment_token(&self, token: &str) -> Result<Option<Order>, RepositoryError>;

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// Order lines in their original cart order.
    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError>;

    /// Move a `pending` order to `paid`. Returns `false` when the order was
    /// no longer pending, in which case nothing was written.
    async fn mark_paid(
        &self,
        id: OrderId,
        details: &PaymentDetails,
    ) -> Result<bool, RepositoryError>;

    /// Move a `pending` order to `payment_failed`. Returns `false` when the
    /// order was no longer pending.
    async fn mark_payment_failed(&self, id: OrderId, message: &str)
    -> Result<bool, RepositoryError>;

    /// Record the `sale` movement for one line and decrement the matching
    /// variant or product stock.
    async fn apply_sale_stock(&self, item: &OrderItem) -> Result<StockApplication, RepositoryError>;

    async fn mark_stock_applied(&self, id: OrderId) -> Result<(), RepositoryError>;

    async fn increment_coupon_usage(&self, code: &str) -> Result<(), RepositoryError>;

    /// Paid orders whose stock was never fully applied, paid before `paid_before`.
    async fn paid_orders_missing_stock(
        &self,
        paid_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
