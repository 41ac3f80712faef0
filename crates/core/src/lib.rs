//! Kumas Core - Shared domain types.
//!
//! This crate provides common types used across all Kumas components:
//! - `storefront` - Checkout, payment settlement and image delivery service
//! - `cli` - Migrations and operational jobs
//!
//! # Architecture
//!
//! The core crate contains only types and pure arithmetic - no I/O, no database
//! access, no HTTP clients. Everything money-related that must be identical
//! between the HTTP service and the reconciliation jobs lives here.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, currencies and shipping policy, discounts, order
//!   status state machine, emails

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
