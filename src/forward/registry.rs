//! Shared record of which channels are currently unhealthy.

use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::debug;

use super::channel::Channel;

/// Set of channels whose most recent delivery attempt failed.
///
/// A channel is healthy iff it is absent from the set. Reads may be stale
/// relative to concurrent writes from other workers.
#[derive(Debug, Default)]
pub struct FailureRegistry {
    failed: Mutex<BTreeSet<Channel>>,
}

impl FailureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt; always clears the channel.
    pub fn mark_healthy(&self, channel: Channel) {
        if self.lock().remove(&channel) {
            debug!(channel = %channel, "Channel marked available");
        }
    }

    /// Record a failed attempt.
    pub fn mark_failed(&self, channel: Channel) {
        if self.lock().insert(channel) {
            debug!(channel = %channel, "Channel marked unavailable");
        }
    }

    pub fn is_healthy(&self, channel: Channel) -> bool {
        !self.lock().contains(&channel)
    }

    /// Current unhealthy channels, in `Channel` order.
    pub fn snapshot(&self) -> Vec<Channel> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<Channel>> {
        // The set holds plain values; a panic mid-update cannot leave it torn.
        self.failed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
