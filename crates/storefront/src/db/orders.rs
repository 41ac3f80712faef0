//! Order repository.
//!
//! Every status change is a compare-and-set on `status = 'pending'`, so two
//! concurrent callbacks for the same token cannot both settle the order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use kumas_core::{OrderId, OrderStatus, StockMovementKind};

use super::{OrderStore, RepositoryError, StockApplication};
use crate::models::{NewOrder, Order, OrderItem, PaymentDetails};

const ORDER_COLUMNS: &str = r"
    id, status, payment_token, conversation_id, subtotal, discount, shipping,
    total, currency, coupon_code, customer_id, customer_email, customer_name,
    payment_data, payment_error, paid_at, stock_applied_at, created_at, updated_at
";

const ITEM_COLUMNS: &str = r"
    id, order_id, product_id, variant_id, product_name, variant_name,
    quantity, unit_price, line_total
";

/// Postgres-backed [`OrderStore`].
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn settle(
        &self,
        id: OrderId,
        to: OrderStatus,
        payment_data: Option<serde_json::Value>,
        payment_error: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let to = OrderStatus::Pending
            .transition(to)
            .map_err(|e| RepositoryError::Conflict(e.to_string()))?;

        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = $2,
                payment_data = COALESCE($3, payment_data),
                payment_error = $4,
                paid_at = CASE WHEN $2 = 'paid' THEN now() ELSE paid_at END,
                updated_at = now()
            WHERE id = $1 AND status = $5
            ",
        )
        .bind(id)
        .bind(to)
        .bind(payment_data)
        .bind(payment_error)
        .bind(OrderStatus::Pending)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_pending(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Order>(&format!(
            r"
            INSERT INTO orders (
                status, conversation_id, subtotal, discount, shipping, total,
                currency, coupon_code, customer_id, customer_email, customer_name
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {ORDER_COLUMNS}
            "
        ))
        .bind(OrderStatus::Pending)
        .bind(&order.conversation_id)
        .bind(order.totals.subtotal)
        .bind(order.totals.discount)
        .bind(order.totals.shipping)
        .bind(order.totals.total)
        .bind(order.currency)
        .bind(order.coupon_code.as_deref())
        .bind(order.customer_id)
        .bind(order.customer_email.as_str())
        .bind(&order.customer_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict("conversation id already used".to_string())
            }
            other => RepositoryError::Database(other),
        })?;

        for (position, item) in order.items.iter().enumerate() {
            let position = i32::try_from(position)
                .map_err(|_| RepositoryError::Conflict("too many order lines".to_string()))?;

            sqlx::query(
                r"
                INSERT INTO order_items (
                    order_id, product_id, variant_id, product_name, variant_name,
                    quantity, unit_price, line_total, position
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(created.id)
            .bind(item.product_id)
            .bind(item.variant_id)
            .bind(&item.product_name)
            .bind(item.variant_name.as_deref())
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .bind(position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn attach_payment_token(&self, id: OrderId, token: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE orders SET payment_token = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict("payment token already attached".to_string())
            }
            other => RepositoryError::Database(other),
        })?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn find_by_payment_token(&self, token: &str) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE payment_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY position"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    async fn mark_paid(
        &self,
        id: OrderId,
        details: &PaymentDetails,
    ) -> Result<bool, RepositoryError> {
        self.settle(id, OrderStatus::Paid, Some(details.to_json()), None)
            .await
    }

    async fn mark_payment_failed(
        &self,
        id: OrderId,
        message: &str,
    ) -> Result<bool, RepositoryError> {
        self.settle(id, OrderStatus::PaymentFailed, None, Some(message))
            .await
    }

    async fn apply_sale_stock(&self, item: &OrderItem) -> Result<StockApplication, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r"
            INSERT INTO stock_movements (
                product_id, variant_id, order_id, order_item_id, movement_type, quantity
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_item_id, movement_type) WHERE order_item_id IS NOT NULL
            DO NOTHING
            RETURNING id
            ",
        )
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(item.order_id)
        .bind(item.id)
        .bind(StockMovementKind::Sale.as_str())
        .bind(-item.quantity)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(StockApplication::AlreadyRecorded);
        }

        let updated = match item.variant_id {
            Some(variant_id) => {
                sqlx::query(
                    r"
                    UPDATE product_variants
                    SET stock_quantity = stock_quantity - $2, updated_at = now()
                    WHERE id = $1
                    ",
                )
                .bind(variant_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(
                    r"
                    UPDATE products
                    SET stock_quantity = stock_quantity - $2, updated_at = now()
                    WHERE id = $1
                    ",
                )
                .bind(item.product_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?
            }
        };

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound);
        }

        tx.commit().await?;
        Ok(StockApplication::Applied)
    }

    async fn mark_stock_applied(&self, id: OrderId) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE orders
            SET stock_applied_at = now(), updated_at = now()
            WHERE id = $1 AND stock_applied_at IS NULL
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn increment_coupon_usage(&self, code: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE coupons SET used_count = used_count + 1 WHERE code = $1")
            .bind(code)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn paid_orders_missing_stock(
        &self,
        paid_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE paid_at IS NOT NULL
              AND stock_applied_at IS NULL
              AND paid_at < $1
            ORDER BY paid_at
            LIMIT $2
            "
        ))
        .bind(paid_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }
}
