//! Catalog types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use kumas_core::{Currency, ProductId, VariantId};

/// A sellable product, as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    /// List price in TRY.
    pub price: Decimal,
    /// Sale price in TRY, if on sale.
    pub sale_price: Option<Decimal>,
    pub price_eur: Option<Decimal>,
    pub sale_price_eur: Option<Decimal>,
    pub stock_quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Authoritative unit price in `currency`: the sale price when set,
    /// otherwise the list price. `None` when the product has no price in
    /// that currency.
    #[must_use]
    pub fn unit_price(&self, currency: Currency) -> Option<Decimal> {
        match currency {
            Currency::Try => Some(self.sale_price.unwrap_or(self.price)),
            Currency::Eur => self.sale_price_eur.or(self.price_eur),
        }
    }
}

/// A colour/width/pattern variant of a product. Variants carry their own
/// stock but are priced by their parent product.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub name: String,
    pub is_active: bool,
    pub stock_quantity: Decimal,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn product(sale: Option<&str>, eur: Option<&str>, sale_eur: Option<&str>) -> Product {
        Product {
            id: ProductId::random(),
            name: "Keten Kumaş".to_string(),
            slug: "keten-kumas".to_string(),
            is_active: true,
            price: Decimal::new(100, 0),
            sale_price: sale.map(|s| s.parse().unwrap()),
            price_eur: eur.map(|s| s.parse().unwrap()),
            sale_price_eur: sale_eur.map(|s| s.parse().unwrap()),
            stock_quantity: Decimal::new(40, 0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_list_price_without_sale() {
        let p = product(None, None, None);
        assert_eq!(p.unit_price(Currency::Try), Some(Decimal::new(100, 0)));
    }

    #[test]
    fn test_sale_price_wins() {
        let p = product(Some("79.90"), None, None);
        assert_eq!(p.unit_price(Currency::Try), Some(Decimal::new(7990, 2)));
    }

    #[test]
    fn test_eur_price() {
        let p = product(None, Some("5.50"), None);
        assert_eq!(p.unit_price(Currency::Eur), Some(Decimal::new(550, 2)));

        let p = product(None, Some("5.50"), Some("4.25"));
        assert_eq!(p.unit_price(Currency::Eur), Some(Decimal::new(425, 2)));
    }

    #[test]
    fn test_missing_eur_price() {
        let p = product(None, None, None);
        assert_eq!(p.unit_price(Currency::Eur), None);
    }
}
