//! SMTP notifier. Missing SMTP configuration disables delivery with a
//! warning rather than failing startup, matching how the rest of the service
//! treats optional integrations.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::domain::{DeliveryMethod, Order};

use super::{Notifier, NotifyError};

pub struct EmailNotifier {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
    sales_to: Option<String>,
    store_name: String,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig, store_name: &str) -> Self {
        let transport = match (&config.host, &config.user, &config.pass) {
            (Some(host), Some(user), Some(pass)) => {
                let relay = if config.port == 465 {
                    AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                };
                match relay {
                    Ok(builder) => Some(
                        builder
                            .port(config.port)
                            .credentials(Credentials::new(user.clone(), pass.clone()))
                            .build(),
                    ),
                    Err(err) => {
                        tracing::warn!(%err, "invalid SMTP relay, email notifications disabled");
                        None
                    }
                }
            }
            _ => {
                tracing::warn!("SMTP not fully configured, email notifications disabled");
                None
            }
        };

        let from = match (&config.from_email, &config.from_name) {
            (Some(email), Some(name)) => format!("{name} <{email}>"),
            (Some(email), None) => email.clone(),
            _ => config.user.clone().unwrap_or_default(),
        };

        Self {
            transport,
            from,
            sales_to: config.sales_email.clone(),
            store_name: store_name.to_string(),
        }
    }

    fn build(&self, to: &str, subject: &str, html: String) -> Result<Message, NotifyError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| NotifyError::Message(format!("from address: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotifyError::Message(format!("to address: {e}")))?;
        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| NotifyError::Message(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    /// Builds the messages up front and hands delivery to a background task,
    /// so callers (the webhook ack path in particular) never wait on the SMTP
    /// relay. Delivery failures are logged by the task.
    async fn order_paid(&self, order: &Order) -> Result<(), NotifyError> {
        let Some(transport) = &self.transport else {
            tracing::warn!(order_id = %order.id, "order paid but SMTP is disabled, no email sent");
            return Ok(());
        };

        let html = order_html(order, &self.store_name);
        let customer = order.shipping_address.contact.email.clone();
        let customer_message = self.build(
            &customer,
            &format!("{} - your order is confirmed", self.store_name),
            html.clone(),
        )?;
        let sales_message = match &self.sales_to {
            Some(sales) => Some(self.build(sales, &format!("New paid order {}", order.id), html)?),
            None => None,
        };

        let transport = transport.clone();
        let order_id = order.id;
        tokio::spawn(async move {
            match transport.send(customer_message).await {
                Ok(_) => tracing::info!(%order_id, to = %customer, "confirmation email sent"),
                Err(err) => tracing::error!(%order_id, %err, "confirmation email failed"),
            }
            if let Some(message) = sales_message {
                if let Err(err) = transport.send(message).await {
                    tracing::error!(%order_id, %err, "sales notification failed");
                }
            }
        });
        Ok(())
    }
}

fn order_html(order: &Order, store_name: &str) -> String {
    let rows: String = order
        .items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                item.name,
                item.quantity,
                format_clp(item.price),
                format_clp(item.total)
            )
        })
        .collect();
    let delivery = match order.shipping_address.method {
        DeliveryMethod::Pickup => "Store pickup".to_string(),
        DeliveryMethod::Home => order
            .shipping_address
            .address
            .as_ref()
            .map(|a| format!("{} {}, {}, {}", a.street, a.street_number, a.comuna, a.region))
            .unwrap_or_else(|| "Home delivery".to_string()),
    };
    format!(
        "<div style=\"font-family: Arial, sans-serif\">\
         <h2>{store_name}</h2>\
         <p>Order <strong>#{id}</strong></p>\
         <table border=\"1\" cellpadding=\"6\" cellspacing=\"0\">\
         <tr><th>Product</th><th>Qty</th><th>Price</th><th>Subtotal</th></tr>{rows}</table>\
         <p>Shipping: {shipping}</p>\
         <p>Delivery: {delivery}</p>\
         <p>Total: <strong>{total}</strong></p>\
         </div>",
        id = order.id,
        rows = rows,
        shipping = format_clp(order.shipping_address.cost),
        delivery = delivery,
        total = format_clp(order.total),
    )
}

/// `1234567` -> `$1.234.567` (Chilean peso grouping).
fn format_clp(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if amount < 0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}
