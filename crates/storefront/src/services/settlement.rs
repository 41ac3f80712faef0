//! Payment callback reconciliation.
//!
//! Moves one order out of `pending` exactly once. Every path ends in a
//! [`SettlementOutcome`], which the callback route turns into a redirect;
//! nothing here retries.
//!
//! Stock is applied after the order is durably `paid`, one line at a time.
//! A line that fails leaves `stock_applied_at` unset so the
//! `kumas reconcile-stock` audit picks the order up later.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use kumas_core::{OrderId, OrderStatus};

use crate::config::CheckoutConfig;
use crate::db::{OrderStore, RepositoryError, StockApplication};
use crate::models::{Order, OrderItem};
use crate::payment::{GatewayError, PaymentGateway, PaymentStatus};

use super::notifications::{Notification, NotificationQueue, OrderConfirmation};

/// Machine-readable reason carried on the error redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NoToken,
    OrderNotFound,
    PaymentFailed,
    PaymentError,
    ServerError,
}

impl FailureReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::OrderNotFound => "order_not_found",
            Self::PaymentFailed => "payment_failed",
            Self::PaymentError => "payment_error",
            Self::ServerError => "server_error",
        }
    }
}

/// Result of one callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// This invocation moved the order to `paid`.
    Paid { order_id: OrderId },
    /// The order had already been settled; nothing was changed.
    AlreadySettled {
        order_id: OrderId,
        status: OrderStatus,
        message: Option<String>,
    },
    Failed {
        reason: FailureReason,
        message: Option<String>,
    },
}

impl SettlementOutcome {
    /// Where to send the customer.
    #[must_use]
    pub fn redirect_url(&self, urls: &CheckoutConfig) -> String {
        match self {
            Self::Paid { order_id } => success_url(urls, *order_id),
            Self::AlreadySettled {
                order_id, status, ..
            } if status.is_paid() => success_url(urls, *order_id),
            Self::AlreadySettled { message, .. } => {
                error_url(urls, FailureReason::PaymentFailed, message.as_deref())
            }
            Self::Failed { reason, message } => error_url(urls, *reason, message.as_deref()),
        }
    }
}

fn success_url(urls: &CheckoutConfig, order_id: OrderId) -> String {
    format!("{}?orderId={order_id}", urls.success_url)
}

fn error_url(urls: &CheckoutConfig, reason: FailureReason, message: Option<&str>) -> String {
    let mut url = format!("{}?reason={}", urls.error_url, reason.as_str());
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        url.push_str("&message=");
        url.push_str(&urlencoding::encode(message));
    }
    url
}

/// Per-order stock application summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StockReport {
    pub applied: usize,
    pub already_recorded: usize,
    pub failed: usize,
}

impl StockReport {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Record the `sale` movement for every line of a paid order.
///
/// Lines are independent: a failing line is logged and skipped, never rolled
/// back into the payment status. When every line is recorded the order is
/// stamped with `stock_applied_at`. Safe to call repeatedly.
///
/// # Errors
///
/// Returns an error only when the order lines cannot be read or the final
/// stamp cannot be written.
pub async fn apply_order_stock(
    store: &dyn OrderStore,
    order_id: OrderId,
    items: &[OrderItem],
) -> Result<StockReport, RepositoryError> {
    let mut report = StockReport::default();

    for item in items {
        match store.apply_sale_stock(item).await {
            Ok(StockApplication::Applied) => report.applied += 1,
            Ok(StockApplication::AlreadyRecorded) => report.already_recorded += 1,
            Err(e) => {
                report.failed += 1;
                error!(
                    %order_id,
                    order_item_id = %item.id,
                    product_id = %item.product_id,
                    error = %e,
                    "Stock decrement failed for paid order line"
                );
            }
        }
    }

    if report.is_complete() {
        store.mark_stock_applied(order_id).await?;
    }
    Ok(report)
}

/// Reconciles gateway callbacks into order state.
#[derive(Clone)]
pub struct SettlementService {
    orders: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationQueue,
}

impl SettlementService {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationQueue,
    ) -> Self {
        Self {
            orders,
            gateway,
            notifications,
        }
    }

    /// Settle the order behind a checkout-form token.
    #[instrument(skip(self, token), fields(order_id))]
    pub async fn settle(&self, token: Option<&str>) -> SettlementOutcome {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            warn!("Payment callback without token");
            return failed(FailureReason::NoToken, None);
        };

        let order = match self.orders.find_by_payment_token(token).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!("Payment callback for unknown token");
                return failed(FailureReason::OrderNotFound, None);
            }
            Err(e) => {
                error!(error = %e, "Order lookup failed");
                return failed(FailureReason::ServerError, None);
            }
        };
        tracing::Span::current().record("order_id", tracing::field::display(order.id));

        if order.status.is_settled() {
            info!(status = %order.status, "Order already settled, ignoring callback");
            return already_settled(&order);
        }

        let result = match self
            .gateway
            .retrieve_checkout(token, &order.conversation_id)
            .await
        {
            Ok(result) => result,
            Err(e) => return self.fail_payment(&order, &e).await,
        };

        if result.conversation_id.as_deref() != Some(order.conversation_id.as_str()) {
            warn!(
                target: "fraud",
                expected = %order.conversation_id,
                received = ?result.conversation_id,
                "Gateway conversation id mismatch"
            );
            let e = GatewayError::Api {
                code: "conversation_mismatch".to_string(),
                message: "Payment could not be verified".to_string(),
            };
            return self.fail_payment(&order, &e).await;
        }

        match result.status {
            PaymentStatus::Success(details) => match self.orders.mark_paid(order.id, &details).await {
                Ok(true) => {
                    info!(payment_id = ?details.payment_id, "Order paid");
                    self.after_paid(&order).await;
                    SettlementOutcome::Paid { order_id: order.id }
                }
                Ok(false) => self.reload_settled(&order).await,
                Err(e) => {
                    error!(error = %e, "Failed to mark order paid after gateway success");
                    failed(FailureReason::ServerError, None)
                }
            },
            PaymentStatus::Failure(message) => {
                match self.orders.mark_payment_failed(order.id, &message).await {
                    Ok(true) => {
                        info!(%message, "Payment declined");
                        failed(FailureReason::PaymentFailed, Some(message))
                    }
                    Ok(false) => self.reload_settled(&order).await,
                    Err(e) => {
                        error!(error = %e, "Failed to mark order payment_failed");
                        failed(FailureReason::ServerError, None)
                    }
                }
            }
        }
    }

    async fn fail_payment(&self, order: &Order, e: &GatewayError) -> SettlementOutcome {
        let message = e.customer_message();
        warn!(error = %e, "Gateway retrieval failed");

        match self.orders.mark_payment_failed(order.id, &message).await {
            Ok(true) => failed(FailureReason::PaymentError, Some(message)),
            Ok(false) => self.reload_settled(order).await,
            Err(db) => {
                error!(error = %db, "Failed to mark order payment_failed");
                failed(FailureReason::ServerError, None)
            }
        }
    }

    /// Another invocation settled the order while this one was talking to
    /// the gateway.
    async fn reload_settled(&self, order: &Order) -> SettlementOutcome {
        info!("Lost settlement race, reporting current status");
        match self.orders.find_by_id(order.id).await {
            Ok(Some(current)) => already_settled(&current),
            Ok(None) => failed(FailureReason::OrderNotFound, None),
            Err(e) => {
                error!(error = %e, "Order reload failed");
                failed(FailureReason::ServerError, None)
            }
        }
    }

    async fn after_paid(&self, order: &Order) {
        let items = match self.orders.items(order.id).await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "Could not load order lines; stock left for reconciliation");
                return;
            }
        };

        match apply_order_stock(self.orders.as_ref(), order.id, &items).await {
            Ok(report) if !report.is_complete() => warn!(
                applied = report.applied,
                failed = report.failed,
                "Stock partially applied; left for reconciliation"
            ),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to stamp stock application"),
        }

        if let Some(code) = order.coupon_code.as_deref()
            && let Err(e) = self.orders.increment_coupon_usage(code).await
        {
            error!(coupon = code, error = %e, "Failed to record coupon usage");
        }

        self.notifications
            .dispatch(Notification::OrderConfirmation(OrderConfirmation::new(
                order, &items,
            )));
    }
}

const fn failed(reason: FailureReason, message: Option<String>) -> SettlementOutcome {
    SettlementOutcome::Failed { reason, message }
}

fn already_settled(order: &Order) -> SettlementOutcome {
    SettlementOutcome::AlreadySettled {
        order_id: order.id,
        status: order.status,
        message: order.payment_error.clone(),
    }
}
