//! Delivery channels — one `Forwarder` per outbound path.
//!
//! Each forwarder fans a work item out to every destination it has and
//! reports whether at least one of them accepted it. Transports sit behind
//! traits so the forwarding core never touches the modem, SMTP or HTTP
//! directly.

pub mod api;
pub mod email;
pub mod modem;
pub mod sms;

use async_trait::async_trait;

use crate::forward::{Channel, WorkItem};

pub use api::{ApiForwarder, ApiTransport, HttpApiTransport};
pub use email::{EmailForwarder, EmailTransport, SmtpMailer};
pub use modem::LineModemBridge;
pub use sms::{SmsForwarder, SmsTransport};

/// Channel-specific delivery of one work item.
#[async_trait]
pub trait Forwarder: Send + Sync {
    fn channel(&self) -> Channel;

    /// False when the channel has no destinations at all.
    fn is_configured(&self) -> bool;

    /// Try every destination. True iff at least one accepted the message.
    async fn deliver(&self, item: &WorkItem) -> bool;
}
