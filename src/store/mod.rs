//! Persistence layer — libSQL-backed storage for inbound messages and
//! their per-channel delivery status.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{MessageStore, StoredSms};
