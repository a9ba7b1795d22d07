//! Operational alerts for channels that exhausted their retries.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::channel::Channel;
use super::queue::{ChannelQueues, WorkItem};
use super::registry::FailureRegistry;
use crate::pipeline::types::{LogicalMessage, SYSTEM_ORIGINATOR, TIMESTAMP_FORMAT};

/// Fans a failure alert out to the other healthy, configured channels.
pub struct NotificationRouter {
    queues: ChannelQueues,
    registry: Arc<FailureRegistry>,
}

impl NotificationRouter {
    pub fn new(queues: ChannelQueues, registry: Arc<FailureRegistry>) -> Self {
        Self { queues, registry }
    }

    /// Alert every other configured channel that is healthy right now.
    ///
    /// Health is read once per channel at call time; a concurrent worker
    /// may change it immediately afterwards. Returns the channels alerted.
    pub fn notify_failure(&self, failed: Channel, message_id: &str) -> Vec<Channel> {
        let now = Utc::now();
        let body = format!(
            "Service {failed} failed after max retries for SMS ID: {message_id} at {}",
            now.format(TIMESTAMP_FORMAT)
        );
        info!(channel = %failed, message_id, "Generating failure notification");

        let alert = Arc::new(LogicalMessage::new(SYSTEM_ORIGINATOR, now, body));
        let mut alerted = Vec::new();

        for channel in Channel::ALL {
            if channel == failed || !self.queues.is_configured(channel) {
                continue;
            }
            if !self.registry.is_healthy(channel) {
                debug!(channel = %channel, "Skipping alert on unavailable channel");
                continue;
            }
            match self.queues.try_enqueue(channel, WorkItem::new(Arc::clone(&alert))) {
                Ok(()) => {
                    debug!(channel = %channel, "Queued failure notification");
                    alerted.push(channel);
                }
                Err(e) => warn!(error = %e, "Failure notification dropped"),
            }
        }
        alerted
    }
}
