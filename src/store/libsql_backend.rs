//! libSQL backend — async `MessageStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::forward::Channel;
use crate::pipeline::types::{FragmentHeader, MessageId};
use crate::store::migrations;
use crate::store::traits::{MessageStore, StoredSms};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// How long an open fragment row may still be updated by a re-delivery.
    fragment_window: Duration,
}

/// Default window for matching re-delivered fragments.
pub const DEFAULT_FRAGMENT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let store = Self::from_database(db)?;
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            fragment_window: DEFAULT_FRAGMENT_WINDOW,
        })
    }

    /// Limit fragment upserts to rows updated within `window`.
    pub fn with_fragment_window(mut self, window: Duration) -> Self {
        self.fragment_window = window;
        self
    }

    /// Look up the row holding a re-delivered fragment.
    ///
    /// Only rows of a group that is still open match: not yet closed by
    /// reassembly, same part count, and updated within the fragment window.
    /// A reused reference outside those bounds starts a new row.
    async fn find_open_fragment(
        &self,
        sender: &str,
        fragment: &FragmentHeader,
    ) -> Result<Option<MessageId>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, updated_at FROM messages
                 WHERE sender = ?1 AND ref_num = ?2 AND part_num = ?3 AND total_parts = ?4
                   AND group_closed = 0",
                params![
                    sender,
                    i64::from(fragment.reference),
                    i64::from(fragment.part_number),
                    i64::from(fragment.total_parts)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_open_fragment: {e}")))?;

        let window = chrono::Duration::from_std(self.fragment_window)
            .unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();

        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let id: String = row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                    let updated: String = row
                        .get(1)
                        .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                    let fresh = parse_datetime(&updated)
                        .checked_add_signed(window)
                        .is_none_or(|expires| expires > now);
                    if fresh {
                        return Ok(Some(id));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => return Err(DatabaseError::Query(format!("find_open_fragment: {e}"))),
            }
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Column holding the forwarded flag for a channel.
fn forwarded_column(channel: Channel) -> &'static str {
    match channel {
        Channel::Sms => "sms_forwarded",
        Channel::Email => "email_forwarded",
        Channel::Api => "api_forwarded",
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a StoredSms. Column order matches MESSAGE_COLUMNS.
fn row_to_sms(row: &libsql::Row) -> Result<StoredSms, libsql::Error> {
    let received_str: String = row.get(2)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    let ref_num = row.get::<i64>(4).ok();
    let total_parts = row.get::<i64>(5).ok();
    let part_num = row.get::<i64>(6).ok();
    let fragment = match (ref_num, total_parts, part_num) {
        (Some(r), Some(t), Some(p)) => Some(FragmentHeader {
            reference: r as u16,
            total_parts: t as u8,
            part_number: p as u8,
        }),
        _ => None,
    };

    Ok(StoredSms {
        id: row.get(0)?,
        sender: row.get(1)?,
        received_at: parse_datetime(&received_str),
        body: row.get(3)?,
        fragment,
        sms_forwarded: row.get::<i64>(7)? != 0,
        email_forwarded: row.get::<i64>(8)? != 0,
        api_forwarded: row.get::<i64>(9)? != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const MESSAGE_COLUMNS: &str = "id, sender, received_at, body, ref_num, total_parts, part_num, sms_forwarded, email_forwarded, api_forwarded, created_at, updated_at";

#[async_trait]
impl MessageStore for LibSqlStore {
    async fn save_or_update(
        &self,
        sender: &str,
        received_at: DateTime<Utc>,
        text: &str,
        fragment: Option<&FragmentHeader>,
    ) -> Result<MessageId, DatabaseError> {
        let now = Utc::now().to_rfc3339();

        if let Some(fragment) = fragment
            && let Some(id) = self.find_open_fragment(sender, fragment).await?
        {
            self.conn
                .execute(
                    "UPDATE messages SET body = ?1, received_at = ?2, updated_at = ?3 WHERE id = ?4",
                    params![text, received_at.to_rfc3339(), now, id.clone()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("update_fragment: {e}")))?;
            debug!(id = %id, sender, "Fragment updated in DB");
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO messages (id, sender, received_at, body, ref_num, total_parts,
                    part_num, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id.clone(),
                    sender,
                    received_at.to_rfc3339(),
                    text,
                    opt_int(fragment.map(|f| i64::from(f.reference))),
                    opt_int(fragment.map(|f| i64::from(f.total_parts))),
                    opt_int(fragment.map(|f| i64::from(f.part_number))),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        debug!(id = %id, sender, "Message inserted into DB");
        Ok(id)
    }

    async fn close_fragment_group(&self, sender: &str, reference: u16) -> Result<(), DatabaseError> {
        let closed = self
            .conn
            .execute(
                "UPDATE messages SET group_closed = 1, updated_at = ?1
                 WHERE sender = ?2 AND ref_num = ?3 AND group_closed = 0",
                params![Utc::now().to_rfc3339(), sender, i64::from(reference)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("close_fragment_group: {e}")))?;

        debug!(sender, reference, rows = closed, "Fragment group closed");
        Ok(())
    }

    async fn mark_forwarded(&self, id: &str, channel: Channel) -> Result<(), DatabaseError> {
        let column = forwarded_column(channel);
        self.conn
            .execute(
                &format!("UPDATE messages SET {column} = 1, updated_at = ?1 WHERE id = ?2"),
                params![Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_forwarded: {e}")))?;

        debug!(id, channel = %channel, "Message marked as forwarded");
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<StoredSms>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let sms =
                    row_to_sms(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(sms))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }
}
