//! The three outbound delivery channels.

use std::fmt;

/// One independent delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Local notification: SMS relayed through the modem.
    Sms,
    Email,
    /// HTTP API providers.
    Api,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Email, Channel::Api];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::Email => "Email",
            Channel::Api => "API",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Channel::Sms => 0,
            Channel::Email => 1,
            Channel::Api => 2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
