//! Price & coupon resolver.
//!
//! Turns an untrusted cart into an authoritative priced draft. Unit prices
//! always come from the catalog; anything price-like the client sends is
//! ignored. A cart with any bad line is rejected as a whole.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use kumas_core::{Currency, Email, OrderTotals, ProductId, VariantId, round_money};

use crate::db::{ProductCatalog, RepositoryError};
use crate::models::coupon::normalize_code;
use crate::models::{Coupon, CouponCheck, NewOrderItem, Product, ProductVariant};

/// A cart as submitted by the browser.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartRequest {
    #[serde(default)]
    pub items: Vec<CartLine>,
    pub coupon_code: Option<String>,
    /// `TRY` or `EUR`; defaults to `TRY`.
    pub currency: Option<String>,
    pub email: Option<String>,
    /// Client-computed total, used only for mismatch telemetry.
    pub client_total: Option<Decimal>,
}

/// One cart line as submitted. Only `id`, `quantity` and `variantId` are
/// trusted as identifiers; names are used for error messages only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub id: String,
    /// Number or numeric string; fabric may be sold in fractional metres.
    #[serde(default)]
    pub quantity: serde_json::Value,
    pub name: Option<String>,
    pub variant_id: Option<String>,
    pub variant_name: Option<String>,
}

impl CartLine {
    fn label(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.id)
    }
}

/// A line priced from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedLine {
    pub id: ProductId,
    pub variant_id: Option<VariantId>,
    pub name: String,
    pub variant_name: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub line_total: Decimal,
}

impl From<&PricedLine> for NewOrderItem {
    fn from(line: &PricedLine) -> Self {
        Self {
            product_id: line.id,
            variant_id: line.variant_id,
            product_name: line.name.clone(),
            variant_name: line.variant_name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total,
        }
    }
}

/// An authoritative priced cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub totals: OrderTotals,
    pub coupon: Option<Coupon>,
    pub currency: Currency,
}

/// Why a cart could not be priced.
#[derive(Debug, Error)]
pub enum PricingError {
    /// Customer-facing, itemized reasons. Nothing was accepted.
    #[error("cart rejected: {}", .0.join("; "))]
    Rejected(Vec<String>),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Largest quantity an order line can hold (`NUMERIC(12, 3)`).
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 3); // 999_999_999_999 scaled by 10^-3

/// Fractional digits kept for quantities (metres to the millimetre).
pub const QUANTITY_SCALE: u32 = 3;

/// Largest amount a money column can hold (`NUMERIC(12, 2)`).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_0FFF, 0xE8, 0, false, 2); // 999_999_999_999 scaled by 10^-2

/// Parse a claimed quantity. Only finite, strictly positive numbers that fit
/// an order line pass; more than three decimals is rejected, not rounded.
fn parse_quantity(value: &serde_json::Value) -> Option<Decimal> {
    let quantity = match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok()?,
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok()?,
        _ => return None,
    }
    .normalize();
    (quantity > Decimal::ZERO && quantity <= MAX_QUANTITY && quantity.scale() <= QUANTITY_SCALE)
        .then_some(quantity)
}

/// `unit_price * quantity` rounded to cents, or `None` when it cannot be
/// stored.
fn checked_line_total(unit_price: Decimal, quantity: Decimal) -> Option<Decimal> {
    unit_price
        .checked_mul(quantity)
        .map(round_money)
        .filter(|total| *total <= MAX_AMOUNT)
}

struct ParsedLine<'a> {
    claim: &'a CartLine,
    product_id: ProductId,
    variant_id: Option<VariantId>,
    quantity: Decimal,
}

/// Resolves carts against the catalog.
#[derive(Clone)]
pub struct PriceResolver {
    catalog: Arc<dyn ProductCatalog>,
}

impl PriceResolver {
    #[must_use]
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self { catalog }
    }

    /// Price a cart.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::Rejected`] with every line problem found (or
    /// the coupon validator's message), and [`PricingError::Repository`] when
    /// storage fails.
    #[instrument(skip(self, cart), fields(lines = cart.items.len()))]
    pub async fn resolve(&self, cart: &CartRequest) -> Result<PricedCart, PricingError> {
        if cart.items.is_empty() {
            return Err(PricingError::Rejected(vec!["cart is empty".to_string()]));
        }

        let currency = match cart.currency.as_deref() {
            None => Currency::default(),
            Some(raw) => raw
                .parse::<Currency>()
                .map_err(|e| PricingError::Rejected(vec![e.to_string()]))?,
        };

        let mut errors = Vec::new();
        let mut parsed = Vec::with_capacity(cart.items.len());

        for claim in &cart.items {
            let Ok(product_id) = claim.id.parse::<ProductId>() else {
                errors.push(format!("product not found: {}", claim.label()));
                continue;
            };
            let variant_id = match claim.variant_id.as_deref().filter(|v| !v.trim().is_empty()) {
                None => None,
                Some(raw) => {
                    if let Ok(id) = raw.parse::<VariantId>() {
                        Some(id)
                    } else {
                        errors.push(format!(
                            "variant not found: {}",
                            claim.variant_name.as_deref().unwrap_or(raw)
                        ));
                        continue;
                    }
                }
            };
            let Some(quantity) = parse_quantity(&claim.quantity) else {
                errors.push(format!("invalid quantity for {}", claim.label()));
                continue;
            };
            parsed.push(ParsedLine {
                claim,
                product_id,
                variant_id,
                quantity,
            });
        }

        let product_ids: Vec<ProductId> = parsed.iter().map(|l| l.product_id).collect();
        let variant_ids: Vec<VariantId> = parsed.iter().filter_map(|l| l.variant_id).collect();

        let products: HashMap<ProductId, Product> = self
            .catalog
            .products_by_ids(&product_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let variants: HashMap<VariantId, ProductVariant> = self
            .catalog
            .variants_by_ids(&variant_ids)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();

        let mut lines = Vec::with_capacity(parsed.len());
        for line in parsed {
            let Some(product) = products.get(&line.product_id) else {
                errors.push(format!("product not found: {}", line.claim.label()));
                continue;
            };
            if !product.is_active {
                errors.push(format!("product is not available: {}", product.name));
                continue;
            }

            let variant = match line.variant_id {
                None => None,
                Some(id) => match variants.get(&id) {
                    Some(v) if v.product_id == product.id && v.is_active => Some(v),
                    _ => {
                        errors.push(format!(
                            "variant not found: {}",
                            line.claim.variant_name.as_deref().unwrap_or(&product.name)
                        ));
                        continue;
                    }
                },
            };

            let Some(unit_price) = product.unit_price(currency) else {
                errors.push(format!(
                    "price not available in {currency}: {}",
                    product.name
                ));
                continue;
            };

            let Some(line_total) = checked_line_total(unit_price, line.quantity) else {
                errors.push(format!("invalid quantity for {}", line.claim.label()));
                continue;
            };

            lines.push(PricedLine {
                id: product.id,
                variant_id: variant.map(|v| v.id),
                name: product.name.clone(),
                variant_name: variant.map(|v| v.name.clone()),
                quantity: line.quantity,
                unit_price,
                line_total,
            });
        }

        if !errors.is_empty() {
            return Err(PricingError::Rejected(errors));
        }

        let subtotal = lines
            .iter()
            .try_fold(Decimal::ZERO, |acc, l| acc.checked_add(l.line_total))
            .filter(|subtotal| *subtotal <= MAX_AMOUNT)
            .ok_or_else(|| PricingError::Rejected(vec!["order total is too large".to_string()]))?;

        let coupon = match cart.coupon_code.as_deref().and_then(normalize_code) {
            None => None,
            Some(code) => {
                let email = cart
                    .email
                    .as_deref()
                    .and_then(|e| Email::parse(e).ok());
                match self
                    .catalog
                    .validate_coupon(&code, subtotal, email.as_ref().map(Email::as_str))
                    .await?
                {
                    CouponCheck::Valid(coupon) => Some(coupon),
                    CouponCheck::Invalid(message) => {
                        return Err(PricingError::Rejected(vec![message]));
                    }
                }
            }
        };

        let requested_discount = coupon
            .as_ref()
            .map_or(Decimal::ZERO, |c| c.kind.amount_off(c.value, subtotal));
        let totals = OrderTotals::compute(subtotal, requested_discount, currency);

        if let Some(client_total) = cart.client_total
            && !totals.matches_client_total(client_total)
        {
            warn!(
                target: "fraud",
                %client_total,
                server_total = %totals.total,
                %currency,
                "client total does not match server total"
            );
        }

        Ok(PricedCart {
            lines,
            totals,
            coupon,
            currency,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use chrono::Utc;
    use kumas_core::{CouponId, DiscountKind};
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn product(name: &str, price: &str, sale: Option<&str>) -> Product {
        Product {
            id: ProductId::random(),
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            is_active: true,
            price: dec(price),
            sale_price: sale.map(dec),
            price_eur: Some(dec("10")),
            sale_price_eur: None,
            stock_quantity: dec("100"),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn line(product: &Product, quantity: serde_json::Value) -> CartLine {
        CartLine {
            id: product.id.to_string(),
            quantity,
            name: Some(product.name.clone()),
            ..CartLine::default()
        }
    }

    fn resolver(store: Arc<MemoryStore>) -> PriceResolver {
        PriceResolver::new(store)
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!(2)), Some(dec("2")));
        assert_eq!(parse_quantity(&json!(1.5)), Some(dec("1.5")));
        assert_eq!(parse_quantity(&json!("2.25")), Some(dec("2.25")));
        assert_eq!(parse_quantity(&json!(0)), None);
        assert_eq!(parse_quantity(&json!(-1)), None);
        assert_eq!(parse_quantity(&json!("abc")), None);
        assert_eq!(parse_quantity(&json!(null)), None);
        assert_eq!(parse_quantity(&json!(true)), None);
    }

    #[test]
    fn test_parse_quantity_fits_order_line() {
        assert_eq!(parse_quantity(&json!("1.500")), Some(dec("1.5")));
        assert_eq!(parse_quantity(&json!("0.001")), Some(dec("0.001")));
        assert_eq!(parse_quantity(&json!("999999999.999")), Some(MAX_QUANTITY));
        assert_eq!(parse_quantity(&json!("1.2345")), None);
        assert_eq!(parse_quantity(&json!("1000000000")), None);
        assert_eq!(parse_quantity(&json!("79228162514264337593543950335")), None);
        assert_eq!(parse_quantity(&json!(1e300)), None);
    }

    #[tokio::test]
    async fn test_huge_quantity_rejected_not_panicking() {
        let store = Arc::new(MemoryStore::new());
        let p = product("Keten", "100", None);
        store.insert_product(p.clone());

        for quantity in [json!("79228162514264337593543950335"), json!("1.2345")] {
            let cart = CartRequest {
                items: vec![line(&p, quantity.clone())],
                ..CartRequest::default()
            };
            let err = resolver(store.clone()).resolve(&cart).await.unwrap_err();
            assert!(
                matches!(err, PricingError::Rejected(ref e) if e == &["invalid quantity for Keten"]),
                "{quantity}"
            );
        }
    }

    #[tokio::test]
    async fn test_totals_beyond_money_range_rejected() {
        let store = Arc::new(MemoryStore::new());
        let bolt = product("Top Kumas", "6000000000", None);
        store.insert_product(bolt.clone());

        let cart = CartRequest {
            items: vec![line(&bolt, json!(2))],
            ..CartRequest::default()
        };
        let err = resolver(store.clone()).resolve(&cart).await.unwrap_err();
        assert!(matches!(err, PricingError::Rejected(ref e) if e == &["invalid quantity for Top Kumas"]));

        let cart = CartRequest {
            items: vec![line(&bolt, json!(1)), line(&bolt, json!(1))],
            ..CartRequest::default()
        };
        let err = resolver(store).resolve(&cart).await.unwrap_err();
        assert!(matches!(err, PricingError::Rejected(ref e) if e == &["order total is too large"]));
    }

    #[tokio::test]
    async fn test_unit_price_comes_from_catalog() {
        let store = Arc::new(MemoryStore::new());
        let p = product("Keten", "100", Some("80"));
        store.insert_product(p.clone());

        let cart = CartRequest {
            items: vec![line(&p, json!(2))],
            client_total: Some(dec("1")),
            ..CartRequest::default()
        };
        let priced = resolver(store).resolve(&cart).await.unwrap();

        assert_eq!(priced.lines[0].unit_price, dec("80"));
        assert_eq!(priced.totals.subtotal, dec("160"));
        assert_eq!(priced.totals.total, dec("189.90"));
    }

    #[tokio::test]
    async fn test_single_batched_product_read() {
        let store = Arc::new(MemoryStore::new());
        let a = product("Saten", "50", None);
        let b = product("Kadife", "70", None);
        store.insert_product(a.clone());
        store.insert_product(b.clone());

        let cart = CartRequest {
            items: vec![line(&a, json!(1)), line(&b, json!(1))],
            ..CartRequest::default()
        };
        resolver(store.clone()).resolve(&cart).await.unwrap();
        assert_eq!(store.catalog_reads(), 1);
    }

    #[tokio::test]
    async fn test_missing_and_inactive_reject_whole_cart() {
        let store = Arc::new(MemoryStore::new());
        let good = product("Pamuk", "30", None);
        let mut inactive = product("Ipek", "300", None);
        inactive.is_active = false;
        store.insert_product(good.clone());
        store.insert_product(inactive.clone());

        let ghost = CartLine {
            id: ProductId::random().to_string(),
            quantity: json!(1),
            name: Some("Hayalet".to_string()),
            ..CartLine::default()
        };
        let cart = CartRequest {
            items: vec![line(&good, json!(1)), line(&inactive, json!(1)), ghost],
            ..CartRequest::default()
        };

        let PricingError::Rejected(errors) = resolver(store).resolve(&cart).await.unwrap_err()
        else {
            panic!("expected rejection");
        };
        assert_eq!(
            errors,
            vec![
                "product is not available: Ipek".to_string(),
                "product not found: Hayalet".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_quantity_rejected() {
        let store = Arc::new(MemoryStore::new());
        let p = product("Tul", "20", None);
        store.insert_product(p.clone());

        let cart = CartRequest {
            items: vec![line(&p, json!("-3"))],
            ..CartRequest::default()
        };
        let err = resolver(store).resolve(&cart).await.unwrap_err();
        assert!(matches!(err, PricingError::Rejected(ref e) if e == &["invalid quantity for Tul"]));
    }

    #[tokio::test]
    async fn test_empty_cart_rejected() {
        let store = Arc::new(MemoryStore::new());
        let err = resolver(store)
            .resolve(&CartRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_variant_must_belong_to_product() {
        let store = Arc::new(MemoryStore::new());
        let a = product("Saten", "50", None);
        let b = product("Kadife", "70", None);
        let variant = ProductVariant {
            id: VariantId::random(),
            product_id: b.id,
            name: "Bordo".to_string(),
            is_active: true,
            stock_quantity: dec("5"),
        };
        store.insert_product(a.clone());
        store.insert_product(b);
        store.insert_variant(variant.clone());

        let mut claim = line(&a, json!(1));
        claim.variant_id = Some(variant.id.to_string());
        let cart = CartRequest {
            items: vec![claim],
            ..CartRequest::default()
        };
        let err = resolver(store).resolve(&cart).await.unwrap_err();
        assert!(matches!(err, PricingError::Rejected(ref e) if e == &["variant not found: Saten"]));
    }

    #[tokio::test]
    async fn test_eur_requires_eur_price() {
        let store = Arc::new(MemoryStore::new());
        let mut p = product("Krep", "40", None);
        p.price_eur = None;
        store.insert_product(p.clone());

        let cart = CartRequest {
            items: vec![line(&p, json!(1))],
            currency: Some("EUR".to_string()),
            ..CartRequest::default()
        };
        let err = resolver(store).resolve(&cart).await.unwrap_err();
        assert!(
            matches!(err, PricingError::Rejected(ref e) if e == &["price not available in EUR: Krep"])
        );
    }

    #[tokio::test]
    async fn test_coupon_discount_clamped() {
        let store = Arc::new(MemoryStore::new());
        let p = product("Astar", "20", None);
        store.insert_product(p.clone());
        store.insert_coupon(Coupon {
            id: CouponId::random(),
            code: "BIG100".to_string(),
            kind: DiscountKind::Fixed,
            value: dec("100"),
        });

        let cart = CartRequest {
            items: vec![line(&p, json!(1))],
            coupon_code: Some(" big100 ".to_string()),
            ..CartRequest::default()
        };
        let priced = resolver(store).resolve(&cart).await.unwrap();

        assert_eq!(priced.totals.discount, dec("20"));
        assert_eq!(priced.totals.total, dec("29.90"));
        assert_eq!(priced.coupon.unwrap().code, "BIG100");
    }

    #[tokio::test]
    async fn test_invalid_coupon_is_terminal() {
        let store = Arc::new(MemoryStore::new());
        let p = product("Astar", "20", None);
        store.insert_product(p.clone());
        store.reject_coupon("OLD10", "Coupon has expired");

        let cart = CartRequest {
            items: vec![line(&p, json!(1))],
            coupon_code: Some("old10".to_string()),
            ..CartRequest::default()
        };
        let err = resolver(store).resolve(&cart).await.unwrap_err();
        assert!(matches!(err, PricingError::Rejected(ref e) if e == &["Coupon has expired"]));
    }

    #[tokio::test]
    async fn test_unknown_currency_rejected() {
        let store = Arc::new(MemoryStore::new());
        let p = product("Astar", "20", None);
        store.insert_product(p.clone());

        let cart = CartRequest {
            items: vec![line(&p, json!(1))],
            currency: Some("USD".to_string()),
            ..CartRequest::default()
        };
        assert!(matches!(
            resolver(store).resolve(&cart).await,
            Err(PricingError::Rejected(_))
        ));
    }
}
