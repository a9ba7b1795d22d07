//! Local notification channel — relays messages as SMS through the modem.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use super::Forwarder;
use crate::error::ForwardError;
use crate::forward::{Channel, WorkItem};

/// Outbound half of the modem driver.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Send one SMS. Errors when the modem rejects or cannot send it.
    async fn send_sms(&self, recipient: &str, text: &str) -> Result<(), ForwardError>;
}

/// Forwards to every configured SMS recipient.
pub struct SmsForwarder {
    recipients: Vec<String>,
    transport: Arc<dyn SmsTransport>,
}

impl SmsForwarder {
    pub fn new(recipients: Vec<String>, transport: Arc<dyn SmsTransport>) -> Self {
        Self {
            recipients,
            transport,
        }
    }
}

#[async_trait]
impl Forwarder for SmsForwarder {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn is_configured(&self) -> bool {
        !self.recipients.is_empty()
    }

    async fn deliver(&self, item: &WorkItem) -> bool {
        let text = item.message.render_text();
        let mut delivered = false;

        for recipient in &self.recipients {
            debug!(recipient = %recipient, "Attempting to send SMS");
            match self.transport.send_sms(recipient, &text).await {
                Ok(()) => {
                    info!(recipient = %recipient, "Successfully sent SMS");
                    delivered = true;
                }
                Err(e) => error!(recipient = %recipient, error = %e, "Failed to send SMS"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::pipeline::types::LogicalMessage;

    /// Records sends; fails for recipients listed in `reject`.
    struct RecordingModem {
        reject: Vec<String>,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SmsTransport for RecordingModem {
        async fn send_sms(&self, recipient: &str, text: &str) -> Result<(), ForwardError> {
            if self.reject.iter().any(|r| r == recipient) {
                return Err(ForwardError::SendFailed {
                    channel: "SMS".into(),
                    destination: recipient.into(),
                    reason: "CMS ERROR 500".into(),
                });
            }
            self.sent.lock().unwrap().push((recipient.into(), text.into()));
            Ok(())
        }
    }

    fn item() -> WorkItem {
        WorkItem::new(Arc::new(LogicalMessage::new("+1999", Utc::now(), "ping")))
    }

    fn modem(reject: &[&str]) -> Arc<RecordingModem> {
        Arc::new(RecordingModem {
            reject: reject.iter().map(|s| s.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn one_accepting_recipient_is_enough() {
        let transport = modem(&["+1"]);
        let forwarder = SmsForwarder::new(vec!["+1".into(), "+2".into()], transport.clone());

        assert!(forwarder.deliver(&item()).await);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+2");
        assert!(sent[0].1.starts_with("From: +1999\nTime: "));
    }

    #[tokio::test]
    async fn all_recipients_failing_fails_delivery() {
        let forwarder = SmsForwarder::new(vec!["+1".into(), "+2".into()], modem(&["+1", "+2"]));
        assert!(!forwarder.deliver(&item()).await);
    }

    #[test]
    fn no_recipients_is_unconfigured() {
        let forwarder = SmsForwarder::new(Vec::new(), modem(&[]));
        assert!(!forwarder.is_configured());
        assert_eq!(forwarder.channel(), Channel::Sms);
    }
}
