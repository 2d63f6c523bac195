//! Persisted "last processed message id" for the poll path.
//!
//! The cursor only moves forward. It is written to durable storage before
//! the in-memory value changes, so a failed write leaves it where it was
//! and the next poll re-reads the same range (at-least-once).

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CursorError;

/// Durable home of the cursor value.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Stored value, or `None` if nothing has been stored yet.
    async fn load(&self) -> Result<Option<i64>, CursorError>;

    /// Durably replace the stored value.
    async fn save(&self, last_processed_id: i64) -> Result<(), CursorError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorRecord {
    last_processed_id: i64,
}

/// Cursor kept as a small JSON file, rewritten via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "cursor".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<i64>, CursorError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => {
                let record: CursorRecord = serde_json::from_str(&raw)?;
                Ok(Some(record.last_processed_id))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, last_processed_id: i64) -> Result<(), CursorError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let raw = serde_json::to_string(&CursorRecord { last_processed_id })?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), last_processed_id, "Cursor persisted");
        Ok(())
    }
}

/// In-memory view of the cursor plus its store. Owned by the poll task,
/// which is its only writer.
pub struct IngestionCursor {
    current: i64,
    store: Box<dyn CursorStore>,
}

impl IngestionCursor {
    /// Load the cursor, starting at `default` when nothing is stored yet.
    /// A fresh default is persisted immediately.
    pub async fn open(store: Box<dyn CursorStore>, default: i64) -> Result<Self, CursorError> {
        let current = match store.load().await? {
            Some(id) => id,
            None => {
                store.save(default).await?;
                info!(last_processed_id = default, "Initialized new ingestion cursor");
                default
            }
        };
        Ok(Self { current, store })
    }

    /// Last processed message id.
    pub fn read(&self) -> i64 {
        self.current
    }

    /// Move the cursor to `new_id`. Rejects moving backwards; persists
    /// before updating the in-memory value.
    pub async fn advance(&mut self, new_id: i64) -> Result<(), CursorError> {
        if new_id < self.current {
            return Err(CursorError::Regression {
                current: self.current,
                requested: new_id,
            });
        }
        if new_id == self.current {
            return Ok(());
        }
        self.store.save(new_id).await?;
        self.current = new_id;
        Ok(())
    }
}
