//! Ingestion — turns inbound SMS events into queued work items.
//!
//! A single task owns the reassembly tracker and reads inbound events from
//! a channel, so the modem driver's threading never reaches the core.
//! Nothing here fails back to the caller: persistence errors are logged
//! and the message is still forwarded, just without a persisted id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::reassembly::ReassemblyTracker;
use super::types::{InboundSms, LogicalMessage, MessageId};
use crate::forward::{ChannelQueues, DeadLetters};
use crate::store::MessageStore;

/// Drives reassembly, persistence and fan-out for inbound messages.
pub struct Ingestor {
    tracker: ReassemblyTracker,
    store: Arc<dyn MessageStore>,
    queues: ChannelQueues,
    dead_letters: Arc<DeadLetters>,
    fragment_ttl: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        queues: ChannelQueues,
        dead_letters: Arc<DeadLetters>,
        fragment_ttl: Duration,
    ) -> Self {
        Self {
            tracker: ReassemblyTracker::new(),
            store,
            queues,
            dead_letters,
            fragment_ttl,
        }
    }

    /// Handle one inbound event. Returns the message that was fanned out,
    /// if this event completed one.
    pub async fn handle_inbound(&mut self, sms: InboundSms) -> Option<Arc<LogicalMessage>> {
        debug!(
            originator = %sms.originator,
            fragment = ?sms.fragment,
            "Handling inbound SMS"
        );

        let evicted = self.tracker.evict_stale(self.fragment_ttl);
        if evicted > 0 {
            info!(evicted, "Evicted stale fragment groups");
        }

        let message_id = self.persist(&sms).await;

        let message = match sms.fragment {
            Some(header) => {
                let done = self
                    .tracker
                    .ingest_fragment(&sms.originator, header, sms.timestamp, &sms.text)?;
                if let Err(e) = self
                    .store
                    .close_fragment_group(&sms.originator, header.reference)
                    .await
                {
                    error!(originator = %sms.originator, error = %e, "Failed to close fragment group");
                }
                info!(
                    originator = %sms.originator,
                    reference = header.reference,
                    parts = header.total_parts,
                    "Multipart message reassembled"
                );
                LogicalMessage::new(sms.originator, done.first_seen, done.text)
            }
            None => LogicalMessage::new(sms.originator, sms.timestamp, sms.text),
        };

        let message = Arc::new(LogicalMessage {
            message_id,
            provider: sms.provider,
            ..message
        });
        let accepted = self
            .queues
            .fan_out(Arc::clone(&message), &self.dead_letters)
            .await;
        info!(
            sender = %message.originator,
            message_id = ?message.message_id,
            channels = ?accepted,
            "Message queued"
        );
        Some(message)
    }

    /// Save the event; fragments are upserted by (sender, reference, part).
    async fn persist(&self, sms: &InboundSms) -> Option<MessageId> {
        match self
            .store
            .save_or_update(&sms.originator, sms.timestamp, &sms.text, sms.fragment.as_ref())
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                error!(originator = %sms.originator, error = %e, "Failed to persist inbound SMS");
                None
            }
        }
    }

    /// Number of partially received messages.
    pub fn pending_fragment_groups(&self) -> usize {
        self.tracker.pending_groups()
    }
}

/// Run the ingestor over an inbound channel until all senders are gone.
pub fn spawn_ingestion(mut ingestor: Ingestor, mut rx: mpsc::Receiver<InboundSms>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Ingestion task started");
        while let Some(sms) = rx.recv().await {
            ingestor.handle_inbound(sms).await;
        }
        info!("Inbound channel closed, ingestion stopping");
    })
}
