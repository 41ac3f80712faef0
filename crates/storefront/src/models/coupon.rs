//! Coupon types.

use rust_decimal::Decimal;
use serde::Serialize;

use kumas_core::{CouponId, DiscountKind};

/// A coupon the storage-side validator accepted for a given cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    #[serde(skip)]
    pub id: CouponId,
    /// Upper-case code.
    pub code: String,
    #[serde(rename = "type")]
    pub kind: DiscountKind,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
}

/// Result of asking storage whether a coupon applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponCheck {
    Valid(Coupon),
    /// Customer-facing reason the coupon was refused.
    Invalid(String),
}

/// Normalize a customer-typed coupon code. Blank input means "no coupon".
#[must_use]
pub fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    (!code.is_empty()).then_some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" save50 "), Some("SAVE50".to_string()));
        assert_eq!(normalize_code("   "), None);
        assert_eq!(normalize_code(""), None);
    }
}
