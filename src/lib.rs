//! SMS Forwarder — multi-channel forwarding engine for modem-received SMS.

pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod forward;
pub mod logging;
pub mod pipeline;
pub mod store;
