use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;

use sms_forward::config::{PollSettings, ServiceConfig};
use sms_forward::ingest::{
    self, AppState, FileCursorStore, IngestionCursor, LibSqlMessageStore, MessageStore,
};
use sms_forward::notify::{HttpTransport, NotificationDispatcher};
use sms_forward::routing::RoutingEngine;
use sms_forward::rules::RuleSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env().context("Invalid environment configuration")?;

    eprintln!("📨 SMS Forward v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Rules: {}", config.rules_path.display());
    eprintln!("   Push API: http://0.0.0.0:{}/api/v1/sms", config.http_port);
    eprintln!(
        "   Secret: {}",
        if config.secret.is_some() { "required" } else { "not set" }
    );

    // ── Rules + routing ─────────────────────────────────────────────────
    let rules = RuleSet::load(&config.rules_path)
        .await
        .with_context(|| format!("Failed to load rules from {}", config.rules_path.display()))?;
    if rules.is_empty() {
        tracing::warn!("No forwarding rules configured; messages will be accepted but not sent");
    }

    let transport = Arc::new(
        HttpTransport::new(config.notify_timeout).context("Failed to build notification client")?,
    );
    let engine = Arc::new(RoutingEngine::new(
        rules,
        NotificationDispatcher::new(transport),
    ));

    // ── Poll ingestion ──────────────────────────────────────────────────
    let poller = match &config.poll {
        Some(poll) => {
            eprintln!(
                "   Polling: {} every {}s",
                poll.db_path.display(),
                poll.poller.interval.as_secs()
            );
            Some(start_poller(poll, Arc::clone(&engine)).await?)
        }
        None => {
            eprintln!("   Polling: disabled (SMSD_DB_PATH not set)");
            None
        }
    };

    // ── Rule reload on SIGHUP ───────────────────────────────────────────
    #[cfg(unix)]
    spawn_reload_on_hangup(Arc::clone(&engine), config.rules_path.clone())?;

    // ── Push HTTP server ────────────────────────────────────────────────
    let app = ingest::push_routes(AppState::new(Arc::clone(&engine), config.secret.clone()));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "Push server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Push server failed")?;

    if let Some((handle, shutdown)) = poller {
        // Seen on the next tick, after any in-flight batch has finished.
        shutdown.store(true, Ordering::Relaxed);
        if let Err(e) = handle.await {
            tracing::error!("SMS poller task failed: {e}");
        }
    }

    tracing::info!("Stopped");
    Ok(())
}

async fn start_poller(
    poll: &PollSettings,
    engine: Arc<RoutingEngine>,
) -> anyhow::Result<(
    tokio::task::JoinHandle<()>,
    Arc<std::sync::atomic::AtomicBool>,
)> {
    let store = LibSqlMessageStore::new_local(&poll.db_path, &poll.source_label)
        .await
        .with_context(|| format!("Failed to open SMS database {}", poll.db_path.display()))?;

    let start_at = if poll.skip_backlog {
        store
            .max_id()
            .await
            .context("Failed to read newest message id for SMS_SKIP_BACKLOG")?
    } else {
        0
    };

    let cursor = IngestionCursor::open(Box::new(FileCursorStore::new(&poll.cursor_path)), start_at)
        .await
        .with_context(|| format!("Failed to open cursor {}", poll.cursor_path.display()))?;
    eprintln!(
        "   Cursor: {} (last processed id {})",
        poll.cursor_path.display(),
        cursor.read()
    );

    let store: Arc<dyn MessageStore> = Arc::new(store);
    Ok(ingest::spawn_sms_poller(poll.poller, store, cursor, engine))
}

#[cfg(unix)]
fn spawn_reload_on_hangup(engine: Arc<RoutingEngine>, path: std::path::PathBuf) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!(path = %path.display(), "SIGHUP received, reloading rules");
            if let Err(e) = engine.reload_rules(&path).await {
                tracing::error!(error = %e, "Rule reload failed; keeping current rules");
            }
        }
    });
    Ok(())
}
