//! Core types for Kumas.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod discount;
pub mod email;
pub mod id;
pub mod price;
pub mod status;

pub use discount::{DiscountKind, UnknownDiscountKind};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Currency, OrderTotals, ShippingPolicy, UnsupportedCurrency, round_money};
pub use status::*;
