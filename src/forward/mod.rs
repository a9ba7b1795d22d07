//! Forwarding core — channel queues, workers, failure tracking and alerts.
//!
//! Core components:
//! - `channel`: the three delivery channels
//! - `queue`: bounded per-channel work queues and dead letters
//! - `registry`: shared set of currently unhealthy channels
//! - `router`: failure alerts to the remaining healthy channels
//! - `worker`: per-channel retry loop

pub mod channel;
pub mod queue;
pub mod registry;
pub mod router;
pub mod worker;

pub use channel::Channel;
pub use queue::{ChannelQueues, DeadLetter, DeadLetterReason, DeadLetters, QueueReceivers, WorkItem};
pub use registry::FailureRegistry;
pub use router::NotificationRouter;
pub use worker::{ForwardWorker, ItemOutcome, RetryPolicy, WorkerDeps};
