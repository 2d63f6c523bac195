//! Poll source: read-only access to the modem daemon's message table.
//!
//! gammu-smsd keeps received messages in an `inbox` table keyed by an
//! ascending integer `ID`. We only ever read from it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::message::{Message, parse_timestamp};

/// Source of messages for the poll path.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages with id strictly greater than `last_id`, ascending.
    async fn fetch_after(&self, last_id: i64) -> Result<Vec<Message>, StoreError>;

    /// Highest id currently stored (0 when empty).
    async fn max_id(&self) -> Result<i64, StoreError>;
}

const INBOX_COLUMNS: &str = "ID, SenderNumber, ReceivingDateTime, TextDecoded, RecipientID";

/// libSQL reader for a gammu-smsd SQLite database.
pub struct LibSqlMessageStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    source_label: String,
}

impl LibSqlMessageStore {
    /// Open the daemon's database file.
    pub async fn new_local(path: &Path, source_label: &str) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("{}: {e}", path.display())))?;
        let store = Self::from_database(db, source_label)?;
        info!(path = %path.display(), "Message store opened");
        Ok(store)
    }

    /// In-memory database (for tests).
    pub async fn new_memory(source_label: &str) -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("in-memory database: {e}")))?;
        Self::from_database(db, source_label)
    }

    fn from_database(db: LibSqlDatabase, source_label: &str) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            source_label: source_label.to_string(),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Map an `inbox` row (in `INBOX_COLUMNS` order) to a message.
fn row_to_message(row: &libsql::Row, source_label: &str) -> Result<Message, libsql::Error> {
    let id: i64 = row.get(0)?;
    let sender: String = row.get::<String>(1).unwrap_or_default();
    let received_raw: String = row.get::<String>(2).unwrap_or_default();
    let text: String = row.get::<String>(3).unwrap_or_default();
    let device_id: String = row.get::<String>(4).unwrap_or_default();

    let received_at = parse_timestamp(&received_raw).unwrap_or_else(|| {
        warn!(sms_id = id, raw = %received_raw, "Unparseable ReceivingDateTime, using now");
        Utc::now()
    });

    Ok(Message::new(id, sender, text)
        .with_received_at(received_at)
        .with_source(source_label)
        .with_device(device_id.trim()))
}

#[async_trait]
impl MessageStore for LibSqlMessageStore {
    async fn fetch_after(&self, last_id: i64) -> Result<Vec<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {INBOX_COLUMNS} FROM inbox WHERE ID > ?1 ORDER BY ID ASC"),
                params![last_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("fetch_after: {e}")))?;

        let mut messages = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_message(&row, &self.source_label) {
                    Ok(msg) => messages.push(msg),
                    Err(e) => warn!("Skipping inbox row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(StoreError::Query(format!("fetch_after: {e}"))),
            }
        }
        Ok(messages)
    }

    async fn max_id(&self) -> Result<i64, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT COALESCE(MAX(ID), 0) FROM inbox", ())
            .await
            .map_err(|e| StoreError::Query(format!("max_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| StoreError::Query(format!("max_id: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("max_id: {e}"))),
        }
    }
}
