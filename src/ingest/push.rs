//! Push ingestion: HTTP endpoints the modem daemon (or anything else)
//! posts received messages to, plus health and status probes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::message::{Message, parse_timestamp};
use crate::routing::RoutingEngine;

const HEALTH_PATH: &str = "/api/v1/health";

/// Source label for messages injected through `/api/v1/test`.
pub const TEST_SOURCE_LABEL: &str = "test";

/// Shared state for the push handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RoutingEngine>,
    /// When set, every push must carry this value in `secret`.
    pub secret: Option<Arc<SecretString>>,
}

impl AppState {
    pub fn new(engine: Arc<RoutingEngine>, secret: Option<SecretString>) -> Self {
        Self {
            engine,
            secret: secret.map(Arc::new),
        }
    }

    fn authorized(&self, presented: Option<&str>) -> bool {
        match &self.secret {
            None => true,
            Some(expected) => presented.is_some_and(|p| {
                constant_time_eq(p.as_bytes(), expected.expose_secret().as_bytes())
            }),
        }
    }
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Body of `POST /api/v1/sms`.
#[derive(Debug, Deserialize)]
pub struct SmsPushRequest {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub number: String,
    /// Receive time as sent by the daemon.
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub phone_id: Option<String>,
    #[serde(default)]
    pub sms_id: Option<i64>,
    /// Unix seconds (number or string) or a timestamp string.
    #[serde(default)]
    pub timestamp: Option<Value>,
}

/// Body of `POST /api/v1/test`.
#[derive(Debug, Deserialize)]
pub struct TestRequest {
    #[serde(default)]
    pub number: String,
    #[serde(default)]
    pub text: String,
}

/// Build the push/diagnostics router.
pub fn push_routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, HEALTH_PATH)]) }),
        )
        .route(HEALTH_PATH, get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/sms", post(receive_sms))
        .route("/api/v1/sms/receive", post(receive_sms))
        .route("/api/v1/test", post(test_sms))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"status": "error", "message": message.into()})),
    )
}

// ── Probes ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "time": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "last_processed_id": state.engine.last_routed_id(),
        "rule_count": state.engine.rule_count(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Ingestion ───────────────────────────────────────────────────────────

async fn receive_sms(
    State(state): State<AppState>,
    body: Result<Json<SmsPushRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected SMS push");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON body: {}", rejection.body_text()),
            );
        }
    };

    if !state.authorized(req.secret.as_deref()) {
        warn!(number = %req.number, "SMS push with bad secret");
        return error_response(StatusCode::UNAUTHORIZED, "Authentication failed");
    }

    let text = match req.text.as_deref() {
        Some(t) if !t.trim().is_empty() => t,
        _ => return error_response(StatusCode::BAD_REQUEST, "Missing field: text"),
    };

    let received_at = match resolve_received_at(req.time.as_deref(), req.timestamp.as_ref()) {
        Ok(ts) => ts,
        Err(raw) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Unparseable time: {raw}"),
            );
        }
    };

    let message = Message::new(req.sms_id.unwrap_or(0), req.number.as_str(), text)
        .with_received_at(received_at)
        .with_source(req.source.clone().unwrap_or_default())
        .with_device(req.phone_id.clone().unwrap_or_default());

    info!(
        sms_id = message.id,
        number = %message.sender,
        source = %message.source_label,
        phone_id = %message.device_id,
        "SMS push received"
    );

    let report = state.engine.route(&message).await;

    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": "SMS received and processed",
            "id": report.sms_id,
            "matched": report.matched,
            "delivered": report.delivered,
            "failed": report.failed,
        })),
    )
}

async fn test_sms(
    State(state): State<AppState>,
    body: Result<Json<TestRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid JSON body: {}", rejection.body_text()),
            );
        }
    };

    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing field: text");
    }

    // Id 0 never raises the engine's last-routed id.
    let message = Message::new(0, req.number, req.text).with_source(TEST_SOURCE_LABEL);
    let report = state.engine.route(&message).await;

    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": "Test SMS processed",
            "matched": report.matched,
            "delivered": report.delivered,
            "failed": report.failed,
        })),
    )
}

/// Pick the receive time: `time` if present (must parse), else
/// `timestamp` if usable, else now. The error carries the bad `time` value.
fn resolve_received_at(
    time: Option<&str>,
    timestamp: Option<&Value>,
) -> Result<DateTime<Utc>, String> {
    if let Some(raw) = time.filter(|t| !t.trim().is_empty()) {
        return parse_timestamp(raw).ok_or_else(|| raw.to_string());
    }

    let from_timestamp = timestamp.and_then(|value| match value {
        Value::Number(n) => n.as_i64().and_then(unix_to_datetime),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(unix_to_datetime)
            .or_else(|| parse_timestamp(s)),
        _ => None,
    });

    if from_timestamp.is_none() && timestamp.is_some_and(|v| !v.is_null()) {
        warn!(timestamp = ?timestamp, "Ignoring unusable timestamp");
    }

    Ok(from_timestamp.unwrap_or_else(Utc::now))
}

/// Unix seconds, or milliseconds when the value is too large to be seconds.
fn unix_to_datetime(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DISPLAY_TIME_FORMAT;
    use crate::notify::{HttpTransport, NotificationDispatcher};
    use crate::rules::RuleSet;

    fn state(secret: Option<&str>) -> AppState {
        let transport = Arc::new(HttpTransport::new(std::time::Duration::from_secs(1)).unwrap());
        let engine = RoutingEngine::new(RuleSet::default(), NotificationDispatcher::new(transport));
        AppState::new(Arc::new(engine), secret.map(|s| SecretString::from(s.to_string())))
    }

    #[test]
    fn no_secret_configured_accepts_anything() {
        let state = state(None);
        assert!(state.authorized(None));
        assert!(state.authorized(Some("whatever")));
    }

    #[test]
    fn configured_secret_must_match() {
        let state = state(Some("s3cret"));
        assert!(state.authorized(Some("s3cret")));
        assert!(!state.authorized(Some("wrong")));
        assert!(!state.authorized(None));
    }

    #[test]
    fn time_field_wins_and_must_parse() {
        let ts = resolve_received_at(Some("2025-10-01 08:49:44"), None).unwrap();
        assert_eq!(ts.format(DISPLAY_TIME_FORMAT).to_string(), "2025-10-01 08:49:44");

        assert_eq!(
            resolve_received_at(Some("yesterday"), None).unwrap_err(),
            "yesterday"
        );
    }

    #[test]
    fn falls_back_to_unix_timestamp() {
        let secs = json!(1_759_308_584);
        let from_secs = resolve_received_at(None, Some(&secs)).unwrap();
        assert_eq!(from_secs.timestamp(), 1_759_308_584);

        let millis = json!("1759308584000");
        let from_millis = resolve_received_at(Some(""), Some(&millis)).unwrap();
        assert_eq!(from_millis.timestamp(), 1_759_308_584);
    }

    async fn call(app: Router, request: axum::http::Request<axum::body::Body>) -> (StatusCode, Value) {
        use tower::ServiceExt;

        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: &str) -> axum::http::Request<axum::body::Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_service_and_version() {
        let request = axum::http::Request::builder()
            .uri("/api/v1/health")
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, body) = call(push_routes(state(None)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], env!("CARGO_PKG_NAME"));
        let time = body["time"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(time).is_ok(), "not RFC 3339: {time}");
    }

    #[tokio::test]
    async fn status_timestamp_is_rfc3339() {
        let request = axum::http::Request::builder()
            .uri("/api/v1/status")
            .body(axum::body::Body::empty())
            .unwrap();
        let (status, body) = call(push_routes(state(None)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        let ts = body["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "not RFC 3339: {ts}");
    }

    #[test]
    fn secret_comparison_needs_exact_bytes() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(!constant_time_eq(b"s3cret", b"s3creT"));
        assert!(!constant_time_eq(b"s3cret", b"s3cre"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }

    #[tokio::test]
    async fn root_redirects_to_health() {
        let request = axum::http::Request::builder()
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        let resp = tower::ServiceExt::oneshot(push_routes(state(None)), request)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()["location"], "/api/v1/health");
    }

    #[tokio::test]
    async fn secret_is_checked_before_text() {
        let app = push_routes(state(Some("s3cret")));
        let (status, body) = call(app, post_json("/api/v1/sms", r#"{"number":"1"}"#)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn blank_text_is_a_bad_request() {
        let app = push_routes(state(None));
        let (status, _) = call(app, post_json("/api/v1/sms", r#"{"number":"1","text":"  "}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn push_without_rules_still_succeeds() {
        let app = push_routes(state(None));
        let (status, body) = call(
            app,
            post_json("/api/v1/sms", r#"{"number":"1","text":"hi","sms_id":3}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], 3);
        assert_eq!(body["matched"], json!([]));
    }

    #[test]
    fn unusable_timestamp_means_now() {
        let before = Utc::now();
        let ts = resolve_received_at(None, Some(&json!({"nested": true}))).unwrap();
        assert!(ts >= before);
    }
}
