//! Shared types for the inbound message pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted message identifier (UUID string).
pub type MessageId = String;

/// Originator used for alerts the forwarder generates itself.
pub const SYSTEM_ORIGINATOR: &str = "System";

/// Timestamp layout used in message bodies, subjects and API templates.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Inbound ─────────────────────────────────────────────────────────

/// Concatenation header of one physical SMS fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentHeader {
    /// Reference number shared by every fragment of one message.
    pub reference: u16,
    /// Number of fragments the message was split into.
    pub total_parts: u8,
    /// 1-based position of this fragment.
    pub part_number: u8,
}

/// One inbound SMS event as delivered by the modem driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSms {
    pub originator: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub fragment: Option<FragmentHeader>,
    /// Optional API provider to target instead of the default ones.
    #[serde(default)]
    pub provider: Option<String>,
}

// ── Logical message ─────────────────────────────────────────────────

/// A complete message ready to be forwarded on every channel.
///
/// Immutable once built; each channel queue gets its own `WorkItem`
/// pointing at the same shared value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalMessage {
    pub originator: String,
    pub timestamp: DateTime<Utc>,
    pub body: String,
    /// Absent for system-generated alerts.
    pub message_id: Option<MessageId>,
    /// API provider name; `None` selects the providers flagged `default`.
    pub provider: Option<String>,
}

impl LogicalMessage {
    pub fn new(originator: impl Into<String>, timestamp: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            originator: originator.into(),
            timestamp,
            body: body.into(),
            message_id: None,
            provider: None,
        }
    }

    pub fn with_message_id(mut self, id: impl Into<MessageId>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.provider = provider;
        self
    }

    /// Alerts carry no persisted id.
    pub fn is_system_alert(&self) -> bool {
        self.message_id.is_none()
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Plain-text rendering shared by the SMS and email channels.
    pub fn render_text(&self) -> String {
        format!(
            "From: {}\nTime: {}\nMessage: {}",
            self.originator,
            self.formatted_timestamp(),
            self.body
        )
    }
}
