//! Kumas Storefront library.
//!
//! Checkout validation and start, payment callback settlement, and the image
//! derivation cache, exposed as a library so the binary, the operational CLI
//! and the integration tests share one implementation.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod images;
pub mod middleware;
pub mod models;
pub mod payment;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;

pub use routes::router;
pub use state::{AppState, Collaborators};
