//! Background notification queue.
//!
//! Request handlers hand notifications to a bounded channel and return
//! immediately. A single worker task delivers them through a [`Notifier`]
//! and logs failures; nothing is ever reported back to the request.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use kumas_core::{Currency, OrderId};

use crate::models::{Order, OrderItem};

/// Default channel capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Errors a notifier can report.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),
}

/// One line of an order confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationLine {
    pub name: String,
    pub variant_name: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

/// Data for the "your order is confirmed" message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConfirmation {
    pub order_id: OrderId,
    pub customer_email: String,
    pub customer_name: String,
    pub currency: Currency,
    pub lines: Vec<ConfirmationLine>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
}

impl OrderConfirmation {
    #[must_use]
    pub fn new(order: &Order, items: &[OrderItem]) -> Self {
        Self {
            order_id: order.id,
            customer_email: order.customer_email.clone(),
            customer_name: order.customer_name.clone(),
            currency: order.currency,
            lines: items
                .iter()
                .map(|item| ConfirmationLine {
                    name: item.product_name.clone(),
                    variant_name: item.variant_name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                })
                .collect(),
            subtotal: order.subtotal,
            discount: order.discount,
            shipping: order.shipping,
            total: order.total,
        }
    }
}

/// Work handed to the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OrderConfirmation(OrderConfirmation),
}

impl Notification {
    const fn kind(&self) -> &'static str {
        match self {
            Self::OrderConfirmation(_) => "order_confirmation",
        }
    }
}

/// Delivery channel for notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Notifier used when no SMTP server is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::OrderConfirmation(c) => info!(
                order_id = %c.order_id,
                to = %c.customer_email,
                total = %c.total,
                "Order confirmation (email delivery not configured)"
            ),
        }
        Ok(())
    }
}

/// Sending half of the notification queue. Cheap to clone.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Spawn the worker and return the queue plus the worker handle.
    ///
    /// The worker exits once every clone of the queue has been dropped and
    /// the channel is drained.
    #[must_use]
    pub fn start(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Notification>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                let kind = notification.kind();
                match notifier.send(&notification).await {
                    Ok(()) => debug!(kind, "Notification delivered"),
                    Err(e) => error!(kind, error = %e, "Notification delivery failed"),
                }
            }
            debug!("Notification worker stopped");
        });

        (Self { sender }, handle)
    }

    /// Enqueue without waiting. A full or closed queue drops the
    /// notification with a warning.
    pub fn dispatch(&self, notification: Notification) {
        if let Err(e) = self.sender.try_send(notification) {
            let (reason, notification) = match e {
                mpsc::error::TrySendError::Full(n) => ("queue full", n),
                mpsc::error::TrySendError::Closed(n) => ("queue closed", n),
            };
            warn!(kind = notification.kind(), reason, "Notification dropped");
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use recording::RecordingNotifier;

#[cfg(any(test, feature = "test-util"))]
mod recording {
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::{Notification, Notifier, NotifyError};

    /// Notifier that keeps every notification in memory.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        notify: Notify,
    }

    impl RecordingNotifier {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn sent(&self) -> Vec<Notification> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Wait until at least `count` notifications were delivered.
        pub async fn wait_for(&self, count: usize) {
            loop {
                let notified = self.notify.notified();
                if self.sent.lock().unwrap_or_else(PoisonError::into_inner).len() >= count {
                    return;
                }
                notified.await;
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.clone());
            self.notify.notify_waiters();
            Ok(())
        }
    }
}
