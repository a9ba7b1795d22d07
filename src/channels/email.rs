//! Email channel — SMTP via lettre.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info};

use super::Forwarder;
use crate::config::EmailSettings;
use crate::error::ForwardError;
use crate::forward::{Channel, WorkItem};

/// Subject used for alerts the forwarder raises itself.
pub const SYSTEM_SUBJECT: &str = "System Notification";

/// A fully addressed email ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Anything that can put an email on the wire.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ForwardError>;
}

// ── SMTP ────────────────────────────────────────────────────────────

/// STARTTLS SMTP relay with login credentials.
pub struct SmtpMailer {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(settings: &EmailSettings, timeout: Duration) -> Self {
        Self {
            host: settings.smtp_server.clone(),
            port: settings.smtp_port,
            username: settings.smtp_user.clone(),
            password: SecretString::from(settings.smtp_password.clone()),
            timeout,
        }
    }

    fn transport(&self) -> Result<SmtpTransport, ForwardError> {
        let creds = Credentials::new(
            self.username.clone(),
            self.password.expose_secret().to_string(),
        );

        Ok(SmtpTransport::starttls_relay(&self.host)
            .map_err(|e| send_failed(&self.host, format!("SMTP relay error: {e}")))?
            .port(self.port)
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ForwardError> {
        let message = build_message(email)?;
        let transport = self.transport()?;
        let host = self.host.clone();

        // lettre's SMTP transport is blocking.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| send_failed(&host, format!("SMTP task panicked: {e}")))?
            .map_err(|e| send_failed(&host, format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}

fn send_failed(destination: &str, reason: String) -> ForwardError {
    ForwardError::SendFailed {
        channel: Channel::Email.to_string(),
        destination: destination.to_string(),
        reason,
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ForwardError> {
    address.parse().map_err(|e| ForwardError::InvalidAddress {
        address: address.to_string(),
        reason: format!("{e}"),
    })
}

/// Build a lettre message addressed to every recipient.
pub fn build_message(email: &OutboundEmail) -> Result<Message, ForwardError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&email.from)?)
        .subject(email.subject.as_str());
    for to in &email.to {
        builder = builder.to(parse_mailbox(to)?);
    }
    builder
        .body(email.body.clone())
        .map_err(|e| send_failed(&email.from, format!("Failed to build email: {e}")))
}

// ── Forwarder ───────────────────────────────────────────────────────

/// Sends one email per work item to all configured recipients.
pub struct EmailForwarder {
    from: String,
    recipients: Vec<String>,
    transport: Arc<dyn EmailTransport>,
}

impl EmailForwarder {
    pub fn new(settings: &EmailSettings, transport: Arc<dyn EmailTransport>) -> Self {
        Self {
            from: settings.from_address().to_string(),
            recipients: settings.recipients.clone(),
            transport,
        }
    }

    /// Compose the email for a work item.
    pub fn compose(&self, item: &WorkItem) -> OutboundEmail {
        let message = &item.message;
        let subject = if message.is_system_alert() {
            SYSTEM_SUBJECT.to_string()
        } else {
            format!(
                "SMS from {} at {}",
                message.originator,
                message.formatted_timestamp()
            )
        };
        OutboundEmail {
            from: self.from.clone(),
            to: self.recipients.clone(),
            subject,
            body: message.render_text(),
        }
    }
}

#[async_trait]
impl Forwarder for EmailForwarder {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn is_configured(&self) -> bool {
        !self.recipients.is_empty()
    }

    async fn deliver(&self, item: &WorkItem) -> bool {
        let email = self.compose(item);
        debug!(recipients = ?email.to, "Attempting to send email");
        match self.transport.send(&email).await {
            Ok(()) => {
                info!(recipients = ?email.to, "Successfully sent email");
                true
            }
            Err(e) => {
                error!(error = %e, "Email forwarding failed");
                false
            }
        }
    }
}
