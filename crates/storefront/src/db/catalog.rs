//! Catalog repository: products, variants and coupon validation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use kumas_core::{CouponId, DiscountKind, ProductId, VariantId};

use super::{ProductCatalog, RepositoryError};
use crate::models::{Coupon, CouponCheck, Product, ProductVariant};

/// Postgres-backed [`ProductCatalog`].
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    is_valid: bool,
    error_message: Option<String>,
    coupon_id: Option<Uuid>,
    code: Option<String>,
    discount_type: Option<String>,
    discount_value: Option<Decimal>,
}

impl CouponRow {
    fn into_check(self) -> Result<CouponCheck, RepositoryError> {
        if !self.is_valid {
            return Ok(CouponCheck::Invalid(
                self.error_message
                    .unwrap_or_else(|| "Invalid coupon code".to_string()),
            ));
        }

        let (Some(id), Some(code), Some(kind), Some(value)) = (
            self.coupon_id,
            self.code,
            self.discount_type,
            self.discount_value,
        ) else {
            return Err(RepositoryError::DataCorruption(
                "validate_coupon returned a valid row with missing columns".to_string(),
            ));
        };

        let kind: DiscountKind = kind
            .parse()
            .map_err(|e| RepositoryError::DataCorruption(format!("{e}")))?;

        Ok(CouponCheck::Valid(Coupon {
            id: CouponId::new(id),
            code,
            kind,
            value,
        }))
    }
}

#[async_trait]
impl ProductCatalog for PgCatalog {
    async fn products_by_ids(&self, ids: &[ProductId]) -> Result<Vec<Product>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();

        let products = sqlx::query_as::<_, Product>(
            r"
            SELECT id, name, slug, is_active, price, sale_price, price_eur,
                   sale_price_eur, stock_quantity, created_at, updated_at
            FROM products
            WHERE id = ANY($1)
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    async fn variants_by_ids(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<ProductVariant>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(VariantId::as_uuid).collect();

        let variants = sqlx::query_as::<_, ProductVariant>(
            r"
            SELECT id, product_id, name, is_active, stock_quantity
            FROM product_variants
            WHERE id = ANY($1)
            ",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(variants)
    }

    async fn validate_coupon(
        &self,
        code: &str,
        subtotal: Decimal,
        email: Option<&str>,
    ) -> Result<CouponCheck, RepositoryError> {
        let row = sqlx::query_as::<_, CouponRow>(
            r"
            SELECT is_valid, error_message, coupon_id, code, discount_type, discount_value
            FROM validate_coupon($1, $2, $3)
            ",
        )
        .bind(code)
        .bind(subtotal)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        row.into_check()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_row_carries_message() {
        let row = CouponRow {
            is_valid: false,
            error_message: Some("Coupon has expired".to_string()),
            coupon_id: None,
            code: None,
            discount_type: None,
            discount_value: None,
        };
        assert_eq!(
            row.into_check().unwrap(),
            CouponCheck::Invalid("Coupon has expired".to_string())
        );
    }

    #[test]
    fn test_valid_row_with_gaps_is_corruption() {
        let row = CouponRow {
            is_valid: true,
            error_message: None,
            coupon_id: Some(Uuid::new_v4()),
            code: None,
            discount_type: Some("fixed".to_string()),
            discount_value: Some(Decimal::new(50, 0)),
        };
        assert!(matches!(
            row.into_check(),
            Err(RepositoryError::DataCorruption(_))
        ));
    }

    #[test]
    fn test_valid_row() {
        let id = Uuid::new_v4();
        let row = CouponRow {
            is_valid: true,
            error_message: None,
            coupon_id: Some(id),
            code: Some("SAVE50".to_string()),
            discount_type: Some("fixed".to_string()),
            discount_value: Some(Decimal::new(50, 0)),
        };
        let CouponCheck::Valid(coupon) = row.into_check().unwrap() else {
            panic!("expected a valid coupon");
        };
        assert_eq!(coupon.id.as_uuid(), id);
        assert_eq!(coupon.kind, DiscountKind::Fixed);
    }
}
