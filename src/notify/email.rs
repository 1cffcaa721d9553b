//! SMTP channel: one `multipart/alternative` message (plain + HTML) per run.

use std::time::Duration;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{format, Channel, DeliveryError, RunReport};
use crate::config::EmailSettings;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);
const STARTTLS_PORT: u16 = 587;

pub struct EmailChannel {
    settings: EmailSettings,
}

fn mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address.parse().map_err(|source| DeliveryError::Address {
        address: address.to_string(),
        source,
    })
}

impl EmailChannel {
    pub fn new(settings: EmailSettings) -> Self {
        Self { settings }
    }

    /// Compose the message without sending it.
    pub fn build_message(&self, report: &RunReport<'_>) -> Result<Message, DeliveryError> {
        let plain = format::plain_text(report);
        let html = format::html(report)?;
        let message = Message::builder()
            .from(mailbox(&self.settings.sender)?)
            .to(mailbox(&self.settings.recipient)?)
            .subject(report.command)
            .multipart(MultiPart::alternative_plain_html(plain, html))?;
        Ok(message)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let s = &self.settings;
        let builder = if s.smtp_port == STARTTLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&s.smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&s.smtp_host)?
        };
        Ok(builder
            .port(s.smtp_port)
            .credentials(Credentials::new(s.smtp_user.clone(), s.smtp_pass.clone()))
            .timeout(Some(SMTP_TIMEOUT))
            .build())
    }
}

#[async_trait::async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, report: &RunReport<'_>) -> Result<(), DeliveryError> {
        let message = self.build_message(report)?;
        self.transport()?.send(message).await?;
        Ok(())
    }
}
