//! Poll ingestion. Periodically reads new rows from the modem daemon's
//! store, routes them in id order and advances the persisted cursor.
//!
//! Only this task writes the cursor. A tick that fails before the cursor
//! is persisted leaves it where it was, so the same rows are fetched
//! again on the next tick (at-least-once).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::ingest::cursor::IngestionCursor;
use crate::ingest::store::MessageStore;
use crate::routing::RoutingEngine;

/// Timing knobs for the poll task.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub query_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            query_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No rows past the cursor.
    Idle,
    /// Rows routed and the cursor moved to `cursor`.
    Advanced { routed: usize, cursor: i64 },
    /// The store query failed or timed out; nothing was routed.
    StoreFailed,
    /// Rows routed but the cursor could not be persisted.
    CursorStuck { routed: usize, cursor: i64 },
}

/// Spawn the background poll task.
///
/// Returns a `JoinHandle` and a shutdown flag. The flag is checked between
/// ticks, so an in-flight batch always finishes.
pub fn spawn_sms_poller(
    config: PollerConfig,
    store: Arc<dyn MessageStore>,
    mut cursor: IngestionCursor,
    engine: Arc<RoutingEngine>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            interval_secs = config.interval.as_secs(),
            last_processed_id = cursor.read(),
            "SMS poller started"
        );

        let mut tick = tokio::time::interval(config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("SMS poller shutting down");
                return;
            }

            poll_once(store.as_ref(), &mut cursor, &engine, config.query_timeout).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run a single poll cycle: fetch past the cursor → route in order →
/// advance the cursor to the highest routed id.
pub async fn poll_once(
    store: &dyn MessageStore,
    cursor: &mut IngestionCursor,
    engine: &RoutingEngine,
    query_timeout: Duration,
) -> PollOutcome {
    let last_id = cursor.read();

    let fetched = tokio::time::timeout(query_timeout, store.fetch_after(last_id))
        .await
        .unwrap_or(Err(StoreError::Timeout(query_timeout)));

    let mut messages = match fetched {
        Ok(msgs) => msgs,
        Err(e) => {
            error!(last_processed_id = last_id, error = %e, "SMS poll failed");
            return PollOutcome::StoreFailed;
        }
    };

    // Never re-deliver at or below the cursor, and always route oldest first.
    messages.retain(|m| m.id > last_id);
    messages.sort_by_key(|m| m.id);

    let Some(highest) = messages.last().map(|m| m.id) else {
        return PollOutcome::Idle;
    };

    debug!(count = messages.len(), from = last_id, to = highest, "Fetched new SMS");

    for message in &messages {
        let report = engine.route(message).await;
        if report.failed > 0 {
            warn!(
                sms_id = message.id,
                failed = report.failed,
                delivered = report.delivered,
                "Some notifications failed"
            );
        }
    }

    let routed = messages.len();
    match cursor.advance(highest).await {
        Ok(()) => PollOutcome::Advanced {
            routed,
            cursor: highest,
        },
        Err(e) => {
            error!(
                last_processed_id = cursor.read(),
                requested = highest,
                error = %e,
                "Failed to advance SMS cursor; batch will be re-delivered"
            );
            PollOutcome::CursorStuck {
                routed,
                cursor: cursor.read(),
            }
        }
    }
}
