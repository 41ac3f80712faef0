//! In-memory [`ProductCatalog`] and [`OrderStore`] for tests.
//!
//! A single [`MemoryStore`] implements both traits over shared state, so
//! stock decremented by settlement is visible through the catalog.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use kumas_core::{OrderId, OrderItemId, OrderStatus, ProductId, VariantId};

use super::{OrderStore, ProductCatalog, RepositoryError, StockApplication};
use crate::models::{
    Coupon, CouponCheck, NewOrder, Order, OrderItem, PaymentDetails, Product, ProductVariant,
};

/// A `sale` movement recorded by [`MemoryStore::apply_sale_stock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMovement {
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: Decimal,
}

#[derive(Default)]
struct State {
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, ProductVariant>,
    coupons: HashMap<String, Coupon>,
    coupon_rejections: HashMap<String, String>,
    coupon_usage: HashMap<String, u32>,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
    movements: Vec<RecordedMovement>,
    failing_stock: HashSet<ProductId>,
    catalog_reads: usize,
}

/// Shared in-memory storage.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_product(&self, product: Product) {
        self.lock().products.insert(product.id, product);
    }

    pub fn insert_variant(&self, variant: ProductVariant) {
        self.lock().variants.insert(variant.id, variant);
    }

    /// Register a coupon the validator will accept.
    pub fn insert_coupon(&self, coupon: Coupon) {
        self.lock().coupons.insert(coupon.code.clone(), coupon);
    }

    /// Make the validator refuse `code` with `message`.
    pub fn reject_coupon(&self, code: &str, message: &str) {
        self.lock()
            .coupon_rejections
            .insert(code.to_string(), message.to_string());
    }

    /// Make stock application fail for lines of this product.
    pub fn fail_stock_for(&self, product_id: ProductId) {
        self.lock().failing_stock.insert(product_id);
    }

    #[must_use]
    pub fn product(&self, id: ProductId) -> Option<Product> {
        self.lock().products.get(&id).cloned()
    }

    #[must_use]
    pub fn variant(&self, id: VariantId) -> Option<ProductVariant> {
        self.lock().variants.get(&id).cloned()
    }

    #[must_use]
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.lock().orders.iter().find(|o| o.id == id).cloned()
    }

    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    #[must_use]
    pub fn movements(&self) -> Vec<RecordedMovement> {
        self.lock().movements.clone()
    }

    #[must_use]
    pub fn coupon_usage(&self, code: &str) -> u32 {
        self.lock().coupon_usage.get(code).copied().unwrap_or(0)
    }

    /// Number of batched catalog reads served.
    #[must_use]
    pub fn catalog_reads(&self) -> usize {
        self.lock().catalog_reads
    }

    fn settle(
        &self,
        id: OrderId,
        to: OrderStatus,
        details: Option<&PaymentDetails>,
        error: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.lock();
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(RepositoryError::NotFound)?;

        let Ok(next) = order.status.transition(to) else {
            return Ok(false);
        };

        let now = Utc::now();
        order.status = next;
        order.updated_at = now;
        if let Some(details) = details {
            order.payment_data = Some(details.to_json());
        }
        order.payment_error = error.map(str::to_string);
        if next == OrderStatus::Paid {
            order.paid_at = Some(now);
        }
        Ok(true)
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        let mut state = self.lock();
        state.catalog_reads += 1;
        Ok(ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn variants_by_ids(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<ProductVariant>, RepositoryError> {
        let state = self.lock();
        Ok(ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| state.variants.get(id).cloned())
            .collect())
    }

    async fn validate_coupon(
        &self,
        code: &str,
        _subtotal: Decimal,
        _email: Option<&str>,
    ) -> Result<CouponCheck, RepositoryError> {
        let state = self.lock();
        if let Some(message) = state.coupon_rejections.get(code) {
            return Ok(CouponCheck::Invalid(message.clone()));
        }
        Ok(state.coupons.get(code).cloned().map_or_else(
            || CouponCheck::Invalid("Invalid coupon code".to_string()),
            CouponCheck::Valid,
        ))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_pending(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut state = self.lock();
        if state
            .orders
            .iter()
            .any(|o| o.conversation_id == order.conversation_id)
        {
            return Err(RepositoryError::Conflict(
                "conversation id already used".to_string(),
            ));
        }

        let now = Utc::now();
        let created = Order {
            id: OrderId::random(),
            status: OrderStatus::Pending,
            payment_token: None,
            conversation_id: order.conversation_id,
            subtotal: order.totals.subtotal,
            discount: order.totals.discount,
            shipping: order.totals.shipping,
            total: order.totals.total,
            currency: order.currency,
            coupon_code: order.coupon_code,
            customer_id: order.customer_id,
            customer_email: order.customer_email.into_inner(),
            customer_name: order.customer_name,
            payment_data: None,
            payment_error: None,
            paid_at: None,
            stock_applied_at: None,
            created_at: now,
            updated_at: now,
        };

        for item in order.items {
            state.items.push(OrderItem {
                id: OrderItemId::random(),
                order_id: created.id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                product_name: item.product_name,
                variant_name: item.variant_name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            });
        }
        state.orders.push(created.clone());
        Ok(created)
    }

    async fn attach_payment_token(&self, id: OrderId, token: &str) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if state
            .orders
            .iter()
            .any(|o| o.payment_token.as_deref() == Some(token))
        {
            return Err(RepositoryError::Conflict(
                "payment token already attached".to_string(),
            ));
        }
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(RepositoryError::NotFound)?;
        order.payment_token = Some(token.to_string());
        Ok(())
    }

    async fn find_by_payment_token(&self, token: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|o| o.payment_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.order(id))
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        Ok(self
            .lock()
            .items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn mark_paid(
        &self,
        id: OrderId,
        details: &PaymentDetails,
    ) -> Result<bool, RepositoryError> {
        self.settle(id, OrderStatus::Paid, Some(details), None)
    }

    async fn mark_payment_failed(
        &self,
        id: OrderId,
        message: &str,
    ) -> Result<bool, RepositoryError> {
        self.settle(id, OrderStatus::PaymentFailed, None, Some(message))
    }

    async fn apply_sale_stock(&self, item: &OrderItem) -> Result<StockApplication, RepositoryError> {
        let mut state = self.lock();
        if state.failing_stock.contains(&item.product_id) {
            return Err(RepositoryError::Conflict("stock update refused".to_string()));
        }
        if state.movements.iter().any(|m| m.order_item_id == item.id) {
            return Ok(StockApplication::AlreadyRecorded);
        }

        match item.variant_id {
            Some(variant_id) => {
                let variant = state
                    .variants
                    .get_mut(&variant_id)
                    .ok_or(RepositoryError::NotFound)?;
                variant.stock_quantity -= item.quantity;
            }
            None => {
                let product = state
                    .products
                    .get_mut(&item.product_id)
                    .ok_or(RepositoryError::NotFound)?;
                product.stock_quantity -= item.quantity;
            }
        }

        state.movements.push(RecordedMovement {
            order_id: item.order_id,
            order_item_id: item.id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            quantity: -item.quantity,
        });
        Ok(StockApplication::Applied)
    }

    async fn mark_stock_applied(&self, id: OrderId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        if let Some(order) = state.orders.iter_mut().find(|o| o.id == id) {
            order.stock_applied_at.get_or_insert_with(Utc::now);
        }
        Ok(())
    }

    async fn increment_coupon_usage(&self, code: &str) -> Result<(), RepositoryError> {
        *self.lock().coupon_usage.entry(code.to_string()).or_default() += 1;
        Ok(())
    }

    async fn paid_orders_missing_stock(
        &self,
        paid_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .orders
            .iter()
            .filter(|o| o.stock_applied_at.is_none())
            .filter(|o| o.paid_at.is_some_and(|at| at < paid_before))
            .take(limit)
            .cloned()
            .collect())
    }
}
