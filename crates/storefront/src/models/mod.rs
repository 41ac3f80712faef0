//! Domain models for the storefront.
//!
//! These map one-to-one onto the tables in `crates/storefront/migrations/`.
//! Client-supplied data never becomes one of these types without passing
//! through the pricing resolver first.

pub mod coupon;
pub mod order;
pub mod product;

pub use coupon::{Coupon, CouponCheck};
pub use order::{NewOrder, NewOrderItem, Order, OrderItem, PaymentDetails};
pub use product::{Product, ProductVariant};
