//! Ingestion sources: HTTP push and store polling, plus the poll cursor.

pub mod cursor;
pub mod poller;
pub mod push;
pub mod store;

pub use cursor::{CursorStore, FileCursorStore, IngestionCursor};
pub use poller::{PollOutcome, PollerConfig, poll_once, spawn_sms_poller};
pub use push::{AppState, push_routes};
pub use store::{LibSqlMessageStore, MessageStore};
