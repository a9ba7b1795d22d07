//! Per-channel work queues and the dead-letter buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use super::channel::Channel;
use crate::pipeline::types::LogicalMessage;

/// Maximum number of dead letters kept in memory.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 100;

/// One pending delivery attempt on one channel.
///
/// A retry produces a new `WorkItem` with `retry_count + 1`; items are
/// never mutated while queued.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub message: Arc<LogicalMessage>,
    pub retry_count: u32,
}

impl WorkItem {
    pub fn new(message: Arc<LogicalMessage>) -> Self {
        Self {
            message,
            retry_count: 0,
        }
    }

    /// The follow-up attempt after a failure.
    pub fn next_attempt(&self) -> Self {
        Self {
            message: Arc::clone(&self.message),
            retry_count: self.retry_count + 1,
        }
    }

    /// API provider routing hint.
    pub fn provider_hint(&self) -> Option<&str> {
        self.message.provider.as_deref()
    }
}

/// Why an item could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    #[error("queue for {0} is full")]
    Full(Channel),
    #[error("queue for {0} is closed")]
    Closed(Channel),
}

/// Sending halves of the three channel queues.
#[derive(Debug, Clone)]
pub struct ChannelQueues {
    senders: [mpsc::Sender<WorkItem>; 3],
    configured: [bool; 3],
}

/// Receiving halves, one per worker.
#[derive(Debug)]
pub struct QueueReceivers {
    receivers: [Option<mpsc::Receiver<WorkItem>>; 3],
}

impl QueueReceivers {
    /// Take the receiver for a channel. Each can be taken once.
    pub fn take(&mut self, channel: Channel) -> Option<mpsc::Receiver<WorkItem>> {
        self.receivers[channel.index()].take()
    }
}

impl ChannelQueues {
    /// Create bounded queues. `configured` reports whether a channel has any
    /// destinations; the router skips unconfigured channels.
    pub fn new(capacity: usize, configured: impl Fn(Channel) -> bool) -> (Self, QueueReceivers) {
        let (sms_tx, sms_rx) = mpsc::channel(capacity);
        let (email_tx, email_rx) = mpsc::channel(capacity);
        let (api_tx, api_rx) = mpsc::channel(capacity);

        let queues = Self {
            senders: [sms_tx, email_tx, api_tx],
            configured: Channel::ALL.map(configured),
        };
        let receivers = QueueReceivers {
            receivers: [Some(sms_rx), Some(email_rx), Some(api_rx)],
        };
        (queues, receivers)
    }

    pub fn is_configured(&self, channel: Channel) -> bool {
        self.configured[channel.index()]
    }

    pub fn sender(&self, channel: Channel) -> &mpsc::Sender<WorkItem> {
        &self.senders[channel.index()]
    }

    /// Enqueue without waiting. Used by workers and the router, which must
    /// never block on a full queue.
    pub fn try_enqueue(&self, channel: Channel, item: WorkItem) -> Result<(), EnqueueError> {
        self.sender(channel).try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full(channel),
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed(channel),
        })
    }

    /// Enqueue a fresh item (retry 0) on every channel without waiting.
    ///
    /// A full or closed queue only affects its own channel: the item for it
    /// goes to the dead letters and the other channels still get theirs.
    /// Returns the channels that accepted the message.
    pub async fn fan_out(&self, message: Arc<LogicalMessage>, dead_letters: &DeadLetters) -> Vec<Channel> {
        let mut accepted = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let item = WorkItem::new(Arc::clone(&message));
            match self.sender(channel).try_send(item) {
                Ok(()) => accepted.push(channel),
                Err(mpsc::error::TrySendError::Full(item)) => {
                    warn!(channel = %channel, "Channel queue full, message not enqueued");
                    dead_letters.push(channel, item, DeadLetterReason::QueueFull).await;
                }
                Err(mpsc::error::TrySendError::Closed(item)) => {
                    warn!(channel = %channel, "Channel queue closed, message not enqueued");
                    dead_letters.push(channel, item, DeadLetterReason::QueueClosed).await;
                }
            }
        }
        accepted
    }
}

// ── Dead letters ────────────────────────────────────────────────────

/// Why an item was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    RetriesExhausted,
    QueueFull,
    /// The channel's worker is gone.
    QueueClosed,
}

/// An item that will not be delivered on its channel.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub channel: Channel,
    pub item: WorkItem,
    pub reason: DeadLetterReason,
    pub at: DateTime<Utc>,
}

/// Bounded in-memory buffer of undeliverable items; oldest are evicted.
#[derive(Debug)]
pub struct DeadLetters {
    letters: RwLock<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetters {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            letters: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        })
    }

    pub async fn push(&self, channel: Channel, item: WorkItem, reason: DeadLetterReason) {
        info!(
            channel = %channel,
            message_id = ?item.message.message_id,
            retry = item.retry_count,
            reason = ?reason,
            "Item moved to dead letters"
        );
        let mut letters = self.letters.write().await;
        if letters.len() >= self.capacity {
            letters.pop_front();
        }
        letters.push_back(DeadLetter {
            channel,
            item,
            reason,
            at: Utc::now(),
        });
    }

    pub async fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.letters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.letters.read().await.is_empty()
    }
}
