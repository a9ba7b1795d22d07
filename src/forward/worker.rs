//! Forwarding worker — drains one channel queue forever.
//!
//! Per item:
//! 1. unconfigured channel → acknowledge and skip
//! 2. deliver to all destinations
//! 3. success → channel healthy, forwarded flag set
//! 4. failure with budget left → channel unhealthy, back off, re-enqueue
//! 5. failure at the budget → channel unhealthy, alert, dead-letter

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::channel::Channel;
use super::queue::{ChannelQueues, DeadLetterReason, DeadLetters, EnqueueError, WorkItem};
use super::registry::FailureRegistry;
use super::router::NotificationRouter;
use crate::channels::Forwarder;
use crate::store::MessageStore;

/// Retry policy for one channel.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before re-enqueueing is `backoff_unit * retry_count`, taken
    /// before the increment, so the first retry goes out immediately.
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.backoff_unit.saturating_mul(retry_count)
    }
}

/// Everything a worker shares with the rest of the engine.
#[derive(Clone)]
pub struct WorkerDeps {
    pub queues: ChannelQueues,
    pub registry: Arc<FailureRegistry>,
    pub router: Arc<NotificationRouter>,
    pub store: Arc<dyn MessageStore>,
    pub dead_letters: Arc<DeadLetters>,
}

/// Outcome of processing one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Skipped,
    Delivered,
    Retried,
    DeadLettered,
}

/// Worker owning the receive side of one channel queue.
pub struct ForwardWorker {
    forwarder: Arc<dyn Forwarder>,
    policy: RetryPolicy,
    deps: WorkerDeps,
}

impl ForwardWorker {
    pub fn new(forwarder: Arc<dyn Forwarder>, policy: RetryPolicy, deps: WorkerDeps) -> Self {
        Self {
            forwarder,
            policy,
            deps,
        }
    }

    pub fn channel(&self) -> Channel {
        self.forwarder.channel()
    }

    /// Spawn the worker loop on the runtime.
    pub fn spawn(self, rx: mpsc::Receiver<WorkItem>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    /// Process items until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<WorkItem>) {
        info!(
            channel = %self.channel(),
            max_retries = self.policy.max_retries,
            "Forwarder started"
        );
        while let Some(item) = rx.recv().await {
            self.process(item).await;
        }
        info!(channel = %self.channel(), "Forwarder queue closed, stopping");
    }

    /// Handle a single work item.
    pub async fn process(&self, item: WorkItem) -> ItemOutcome {
        let channel = self.channel();
        let message_id = item.message.message_id.as_deref();
        info!(
            channel = %channel,
            sender = %item.message.originator,
            message_id = ?message_id,
            retry = item.retry_count,
            "Processing queue item"
        );

        if !self.forwarder.is_configured() {
            debug!(channel = %channel, "No destinations configured, skipping");
            return ItemOutcome::Skipped;
        }

        if self.forwarder.deliver(&item).await {
            self.deps.registry.mark_healthy(channel);
            match message_id {
                Some(id) => {
                    if let Err(e) = self.deps.store.mark_forwarded(id, channel).await {
                        error!(channel = %channel, message_id = id, error = %e, "Failed to record forwarded flag");
                    }
                    info!(channel = %channel, message_id = id, "Forwarding succeeded");
                }
                None => info!(channel = %channel, "Notification sent successfully"),
            }
            return ItemOutcome::Delivered;
        }

        self.deps.registry.mark_failed(channel);

        if item.retry_count < self.policy.max_retries {
            warn!(
                channel = %channel,
                attempt = item.retry_count + 1,
                max_retries = self.policy.max_retries,
                "Forwarding failed, retrying"
            );
            tokio::time::sleep(self.policy.delay_for(item.retry_count)).await;
            return match self.deps.queues.try_enqueue(channel, item.next_attempt()) {
                Ok(()) => ItemOutcome::Retried,
                Err(e @ EnqueueError::Full(_)) => {
                    warn!(error = %e, "Retry could not be queued");
                    self.deps
                        .dead_letters
                        .push(channel, item, DeadLetterReason::QueueFull)
                        .await;
                    ItemOutcome::DeadLettered
                }
                Err(e @ EnqueueError::Closed(_)) => {
                    warn!(error = %e, "Retry could not be queued");
                    self.deps
                        .dead_letters
                        .push(channel, item, DeadLetterReason::QueueClosed)
                        .await;
                    ItemOutcome::DeadLettered
                }
            };
        }

        if let Some(id) = message_id {
            self.deps.router.notify_failure(channel, id);
        }
        error!(
            channel = %channel,
            max_retries = self.policy.max_retries,
            message_id = ?message_id,
            "Forwarding failed after max retries"
        );
        self.deps
            .dead_letters
            .push(channel, item, DeadLetterReason::RetriesExhausted)
            .await;
        ItemOutcome::DeadLettered
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::forward::queue::QueueReceivers;
    use crate::pipeline::types::LogicalMessage;
    use crate::store::LibSqlStore;

    /// Returns scripted outcomes in order, then `true` forever.
    struct ScriptedForwarder {
        channel: Channel,
        configured: bool,
        outcomes: Mutex<VecDeque<bool>>,
        calls: Mutex<u32>,
    }

    impl ScriptedForwarder {
        fn new(channel: Channel, outcomes: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                channel,
                configured: true,
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Forwarder for ScriptedForwarder {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn deliver(&self, _item: &WorkItem) -> bool {
            *self.calls.lock().unwrap() += 1;
            self.outcomes.lock().unwrap().pop_front().unwrap_or(true)
        }
    }

    struct Harness {
        deps: WorkerDeps,
        receivers: QueueReceivers,
        store: Arc<LibSqlStore>,
    }

    async fn harness() -> Harness {
        let (queues, receivers) = ChannelQueues::new(8, |_| true);
        let registry = Arc::new(FailureRegistry::new());
        let router = Arc::new(NotificationRouter::new(queues.clone(), Arc::clone(&registry)));
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let deps = WorkerDeps {
            queues,
            registry,
            router,
            store: store.clone(),
            dead_letters: DeadLetters::new(8),
        };
        Harness {
            deps,
            receivers,
            store,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_unit: Duration::ZERO,
        }
    }

    async fn persisted_item(store: &LibSqlStore) -> WorkItem {
        let id = store.save_or_update("+1555", Utc::now(), "hello", None).await.unwrap();
        WorkItem::new(Arc::new(
            LogicalMessage::new("+1555", Utc::now(), "hello").with_message_id(id),
        ))
    }

    #[test]
    fn backoff_uses_count_before_increment() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_unit: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn unconfigured_channel_acknowledges_without_side_effects() {
        let mut h = harness().await;
        let forwarder = Arc::new(ScriptedForwarder {
            channel: Channel::Api,
            configured: false,
            outcomes: Mutex::new(VecDeque::from([false])),
            calls: Mutex::new(0),
        });
        let worker = ForwardWorker::new(forwarder.clone(), policy(3), h.deps.clone());

        let item = persisted_item(&h.store).await;
        assert_eq!(worker.process(item).await, ItemOutcome::Skipped);

        assert_eq!(forwarder.calls(), 0);
        assert!(h.deps.registry.is_healthy(Channel::Api));
        assert!(h.receivers.take(Channel::Api).unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn success_clears_failure_and_sets_flag() {
        let h = harness().await;
        h.deps.registry.mark_failed(Channel::Email);
        let worker = ForwardWorker::new(ScriptedForwarder::new(Channel::Email, &[true]), policy(3), h.deps.clone());

        let item = persisted_item(&h.store).await;
        let id = item.message.message_id.clone().unwrap();
        assert_eq!(worker.process(item).await, ItemOutcome::Delivered);

        assert!(h.deps.registry.is_healthy(Channel::Email));
        let stored = h.store.get_message(&id).await.unwrap().unwrap();
        assert!(stored.email_forwarded);
        assert!(!stored.sms_forwarded);
    }

    #[tokio::test]
    async fn failure_with_budget_requeues_next_attempt() {
        let mut h = harness().await;
        let worker = ForwardWorker::new(ScriptedForwarder::new(Channel::Sms, &[false]), policy(3), h.deps.clone());

        let item = persisted_item(&h.store).await;
        assert_eq!(worker.process(item).await, ItemOutcome::Retried);

        assert!(!h.deps.registry.is_healthy(Channel::Sms));
        let retry = h.receivers.take(Channel::Sms).unwrap().try_recv().unwrap();
        assert_eq!(retry.retry_count, 1);
    }

    #[tokio::test]
    async fn exhausted_item_is_not_requeued_and_alerts_once() {
        let mut h = harness().await;
        let worker = ForwardWorker::new(ScriptedForwarder::new(Channel::Email, &[false]), policy(2), h.deps.clone());

        let mut item = persisted_item(&h.store).await;
        item.retry_count = 2;
        assert_eq!(worker.process(item).await, ItemOutcome::DeadLettered);

        assert!(!h.deps.registry.is_healthy(Channel::Email));
        assert!(h.receivers.take(Channel::Email).unwrap().try_recv().is_err());

        let mut sms = h.receivers.take(Channel::Sms).unwrap();
        let alert = sms.try_recv().unwrap();
        assert!(alert.message.message_id.is_none());
        assert!(sms.try_recv().is_err());
        assert_eq!(h.receivers.take(Channel::Api).unwrap().try_recv().unwrap().retry_count, 0);

        let letters = h.deps.dead_letters.snapshot().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::RetriesExhausted);
    }

    #[tokio::test]
    async fn exhausted_alert_item_raises_no_new_alert() {
        let mut h = harness().await;
        let worker = ForwardWorker::new(ScriptedForwarder::new(Channel::Api, &[false]), policy(0), h.deps.clone());

        let alert = WorkItem::new(Arc::new(LogicalMessage::new("System", Utc::now(), "down")));
        assert_eq!(worker.process(alert).await, ItemOutcome::DeadLettered);

        assert!(h.receivers.take(Channel::Sms).unwrap().try_recv().is_err());
        assert!(h.receivers.take(Channel::Email).unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn retry_into_closed_queue_is_dead_lettered() {
        let mut h = harness().await;
        drop(h.receivers.take(Channel::Sms));
        let worker = ForwardWorker::new(ScriptedForwarder::new(Channel::Sms, &[false]), policy(3), h.deps.clone());

        let item = persisted_item(&h.store).await;
        assert_eq!(worker.process(item).await, ItemOutcome::DeadLettered);

        let letters = h.deps.dead_letters.snapshot().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].channel, Channel::Sms);
        assert_eq!(letters[0].reason, DeadLetterReason::QueueClosed);
        assert_eq!(letters[0].item.retry_count, 0);
    }

    #[tokio::test]
    async fn run_loop_alerts_once_per_exhausted_message() {
        let mut h = harness().await;
        let forwarder = ScriptedForwarder::new(Channel::Email, &[false, false, false]);
        let handle = ForwardWorker::new(forwarder.clone(), policy(2), h.deps.clone())
            .spawn(h.receivers.take(Channel::Email).unwrap());

        let item = persisted_item(&h.store).await;
        h.deps.queues.sender(Channel::Email).send(item).await.unwrap();

        let letters = Arc::clone(&h.deps.dead_letters);
        tokio::time::timeout(Duration::from_secs(5), async {
            while letters.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // Let any stray retry or second alert surface.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(forwarder.calls(), 3);
        for channel in [Channel::Sms, Channel::Api] {
            let mut rx = h.receivers.take(channel).unwrap();
            let alert = rx.try_recv().unwrap();
            assert!(alert.message.body.starts_with("Service Email failed after max retries"));
            assert!(rx.try_recv().is_err());
        }
        assert_eq!(letters.len().await, 1);
        handle.abort();
    }

    #[tokio::test]
    async fn run_loop_retries_until_delivered() {
        let (queues, mut receivers) = ChannelQueues::new(8, |_| true);
        let registry = Arc::new(FailureRegistry::new());
        let router = Arc::new(NotificationRouter::new(queues.clone(), Arc::clone(&registry)));
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let deps = WorkerDeps {
            queues: queues.clone(),
            registry: Arc::clone(&registry),
            router,
            store: store.clone(),
            dead_letters: DeadLetters::new(8),
        };
        let forwarder = ScriptedForwarder::new(Channel::Email, &[false, false]);
        let handle = ForwardWorker::new(forwarder.clone(), policy(3), deps)
            .spawn(receivers.take(Channel::Email).unwrap());

        let item = persisted_item(&store).await;
        let id = item.message.message_id.clone().unwrap();
        queues.sender(Channel::Email).send(item).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = store.get_message(&id).await.unwrap().unwrap();
                if stored.email_forwarded {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(forwarder.calls(), 3);
        assert!(registry.is_healthy(Channel::Email));
        handle.abort();
    }
}
