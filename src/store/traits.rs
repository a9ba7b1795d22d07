//! `MessageStore` trait — the persistence contract the forwarding core uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::forward::Channel;
use crate::pipeline::types::{FragmentHeader, MessageId};

/// A persisted inbound SMS (or one fragment of one).
#[derive(Debug, Clone)]
pub struct StoredSms {
    pub id: MessageId,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    pub body: String,
    pub fragment: Option<FragmentHeader>,
    pub sms_forwarded: bool,
    pub email_forwarded: bool,
    pub api_forwarded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSms {
    pub fn is_forwarded(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => self.sms_forwarded,
            Channel::Email => self.email_forwarded,
            Channel::Api => self.api_forwarded,
        }
    }
}

/// Backend-agnostic message store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Save an inbound message. A fragment re-delivered with the same
    /// (sender, reference, part) while its group is still open updates the
    /// existing row and keeps its id.
    async fn save_or_update(
        &self,
        sender: &str,
        received_at: DateTime<Utc>,
        text: &str,
        fragment: Option<&FragmentHeader>,
    ) -> Result<MessageId, DatabaseError>;

    /// Close every open fragment row of a reassembled message. Later
    /// fragments reusing the reference start new rows.
    async fn close_fragment_group(&self, sender: &str, reference: u16) -> Result<(), DatabaseError>;

    /// Set the forwarded flag for one channel. Idempotent; never clears.
    async fn mark_forwarded(&self, id: &str, channel: Channel) -> Result<(), DatabaseError>;

    /// Fetch a stored message by id.
    async fn get_message(&self, id: &str) -> Result<Option<StoredSms>, DatabaseError>;
}
