//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `pricing` - Authoritative cart pricing and coupon resolution
//! - `checkout` - Pending order creation and gateway token issue
//! - `settlement` - Payment callback reconciliation and stock application
//! - `notifications` - Background delivery of customer notifications
//! - `email` - SMTP delivery of order confirmations

pub mod checkout;
pub mod email;
pub mod notifications;
pub mod pricing;
pub mod settlement;

pub use checkout::{CheckoutError, CheckoutService, CheckoutStartRequest, CheckoutStarted};
pub use notifications::{NotificationQueue, Notifier};
pub use pricing::{CartRequest, PriceResolver, PricedCart, PricingError};
pub use settlement::{FailureReason, SettlementOutcome, SettlementService};
