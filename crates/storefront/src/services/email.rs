//! Order confirmation email.
//!
//! Uses SMTP via lettre for delivery with Askama HTML templates.

use askama::Template;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;

use kumas_core::Currency;

use super::notifications::{Notification, Notifier, NotifyError, OrderConfirmation};
use crate::config::SmtpConfig;

/// A confirmation line with amounts pre-formatted for display.
struct LineView {
    name: String,
    quantity: String,
    line_total: String,
}

/// HTML template for the order confirmation email.
#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct OrderConfirmationHtml<'a> {
    name: &'a str,
    order_id: String,
    lines: &'a [LineView],
    subtotal: String,
    discount: Option<String>,
    shipping: String,
    total: String,
}

/// Plain text template for the order confirmation email.
#[derive(Template)]
#[template(path = "email/order_confirmation.txt")]
struct OrderConfirmationText<'a> {
    name: &'a str,
    order_id: String,
    lines: &'a [LineView],
    subtotal: String,
    discount: Option<String>,
    shipping: String,
    total: String,
}

fn format_money(amount: Decimal, currency: Currency) -> String {
    format!("{}{:.2}", currency.symbol(), amount)
}

/// Notifier that delivers order confirmations over SMTP.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl EmailNotifier {
    /// Create a notifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &SmtpConfig) -> Result<Self, SmtpError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            from_address: config.from.clone(),
        })
    }

    async fn send_order_confirmation(&self, c: &OrderConfirmation) -> Result<(), NotifyError> {
        let lines: Vec<LineView> = c
            .lines
            .iter()
            .map(|line| LineView {
                name: line.variant_name.as_ref().map_or_else(
                    || line.name.clone(),
                    |variant| format!("{} ({variant})", line.name),
                ),
                quantity: line.quantity.normalize().to_string(),
                line_total: format_money(line.line_total, c.currency),
            })
            .collect();

        let order_id = c.order_id.to_string();
        let discount =
            (c.discount > Decimal::ZERO).then(|| format_money(c.discount, c.currency));

        let html = OrderConfirmationHtml {
            name: &c.customer_name,
            order_id: order_id.clone(),
            lines: &lines,
            subtotal: format_money(c.subtotal, c.currency),
            discount: discount.clone(),
            shipping: format_money(c.shipping, c.currency),
            total: format_money(c.total, c.currency),
        }
        .render()?;
        let text = OrderConfirmationText {
            name: &c.customer_name,
            order_id: order_id.clone(),
            lines: &lines,
            subtotal: format_money(c.subtotal, c.currency),
            discount,
            shipping: format_money(c.shipping, c.currency),
            total: format_money(c.total, c.currency),
        }
        .render()?;

        let short_id = order_id.get(..8).unwrap_or(&order_id);
        let subject = format!("Siparişiniz alındı #{short_id}");
        self.send_multipart_email(&c.customer_email, &subject, &text, &html)
            .await
    }

    /// Send a multipart email with both plain text and HTML versions.
    async fn send_multipart_email(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| NotifyError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| NotifyError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::OrderConfirmation(c) => self.send_order_confirmation(c).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(Decimal::new(22990, 2), Currency::Try), "₺229.90");
        assert_eq!(format_money(Decimal::new(5, 0), Currency::Eur), "€5.00");
    }

    #[test]
    fn test_templates_render() {
        let lines = vec![LineView {
            name: "Keten (Bej)".to_string(),
            quantity: "2.5".to_string(),
            line_total: "₺250.00".to_string(),
        }];

        let text = OrderConfirmationText {
            name: "Ayse",
            order_id: "0b6f5c1e".to_string(),
            lines: &lines,
            subtotal: "₺250.00".to_string(),
            discount: Some("₺50.00".to_string()),
            shipping: "₺29.90".to_string(),
            total: "₺229.90".to_string(),
        }
        .render()
        .unwrap();
        assert!(text.contains("Keten (Bej)"));
        assert!(text.contains("₺229.90"));
        assert!(text.contains("₺50.00"));

        let html = OrderConfirmationHtml {
            name: "<b>Ayse</b>",
            order_id: "0b6f5c1e".to_string(),
            lines: &lines,
            subtotal: "₺250.00".to_string(),
            discount: None,
            shipping: "₺29.90".to_string(),
            total: "₺229.90".to_string(),
        }
        .render()
        .unwrap();
        assert!(!html.contains("<b>Ayse</b>"));
        assert!(!html.contains("İndirim"));
    }
}
