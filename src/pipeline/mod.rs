//! Inbound message pipeline.
//!
//! Every modem event flows through:
//! 1. `ReassemblyTracker`: multipart fragments are held until complete
//! 2. `MessageStore::save_or_update()`: each physical SMS is persisted
//! 3. `ChannelQueues::fan_out()`: one work item per channel queue

pub mod ingest;
pub mod reassembly;
pub mod types;
