//! Integration tests for the push HTTP endpoints.
//!
//! Each test spins up the Axum router on a random port with a recording
//! transport in place of the real providers, then drives it over HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use sms_forward::error::DispatchError;
use sms_forward::ingest::{AppState, push_routes};
use sms_forward::notify::{ChannelTransport, NotificationDispatcher, Outbound};
use sms_forward::routing::RoutingEngine;
use sms_forward::rules::RuleSet;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const RULES: &str = r#"
otp:
  type: keyword
  rule: 验证码
  notify: bark
  url: https://api.day.app/DEVICEKEY
bank:
  type: regex
  rule: '尾号\d{4}'
  notify: gotify
  url: https://gotify.example.com
  token: AbCdEf
"#;

/// Captures every outbound request instead of sending it.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn send(&self, request: &Outbound) -> Result<(), DispatchError> {
        if let Outbound::Json { channel, url, body } = request {
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), url.clone(), body.clone()));
        }
        Ok(())
    }
}

/// Start an Axum server on a random port, return (base url, transport).
async fn start_server(secret: Option<&str>) -> (String, Arc<RecordingTransport>) {
    let (rules, problems) = RuleSet::from_yaml_str(RULES).unwrap();
    assert!(problems.is_empty());

    let transport = Arc::new(RecordingTransport::default());
    let engine = Arc::new(RoutingEngine::new(
        rules,
        NotificationDispatcher::new(transport.clone()),
    ));
    let state = AppState::new(engine, secret.map(|s| SecretString::from(s.to_string())));
    let app = push_routes(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), transport)
}

#[tokio::test]
async fn otp_push_reaches_bark_with_quick_copy() {
    timeout(TEST_TIMEOUT, async {
        let (base, transport) = start_server(None).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/v1/sms"))
            .json(&json!({
                "number": "10690000",
                "time": "2025-10-01 08:49:44",
                "text": "您的验证码是654321",
                "source": "gammu-smsd",
                "phone_id": "SIM1",
                "sms_id": 42
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["id"], 42);
        assert_eq!(body["matched"], json!(["otp"]));
        assert_eq!(body["delivered"], 1);
        assert_eq!(body["failed"], 0);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (channel, url, payload) = &sent[0];
        assert_eq!(channel, "bark");
        assert_eq!(url, "https://api.day.app/DEVICEKEY");
        assert_eq!(payload["copy"], "654321");
        assert_eq!(payload["autoCopy"], 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn one_message_can_fire_several_rules() {
    timeout(TEST_TIMEOUT, async {
        let (base, transport) = start_server(None).await;

        let resp = reqwest::Client::new()
            .post(format!("{base}/api/v1/sms/receive"))
            .json(&json!({
                "number": "95588",
                "text": "您尾号1234的卡验证码是778899"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["matched"], json!(["bank", "otp"]));

        let sent = transport.sent.lock().unwrap();
        let channels: Vec<&str> = sent.iter().map(|(c, _, _)| c.as_str()).collect();
        assert_eq!(sent.len(), 2);
        assert!(channels.contains(&"bark"));
        assert!(channels.contains(&"gotify"));
        let (_, gotify_url, gotify) = sent.iter().find(|(c, _, _)| c == "gotify").unwrap();
        assert_eq!(gotify_url, "https://gotify.example.com/message?token=AbCdEf");
        assert_eq!(gotify["priority"], 9);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn wrong_secret_is_rejected_before_routing() {
    timeout(TEST_TIMEOUT, async {
        let (base, transport) = start_server(Some("s3cret")).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/v1/sms"))
            .json(&json!({"secret": "nope", "number": "1", "text": "验证码 123456"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");

        let missing = client
            .post(format!("{base}/api/v1/sms"))
            .json(&json!({"number": "1", "text": "验证码 123456"}))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 401);
        assert!(transport.sent.lock().unwrap().is_empty());

        let ok = client
            .post(format!("{base}/api/v1/sms"))
            .json(&json!({"secret": "s3cret", "number": "1", "text": "验证码 123456"}))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_pushes_are_bad_requests() {
    timeout(TEST_TIMEOUT, async {
        let (base, transport) = start_server(None).await;
        let client = reqwest::Client::new();

        let not_json = client
            .post(format!("{base}/api/v1/sms"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(not_json.status(), 400);

        let no_text = client
            .post(format!("{base}/api/v1/sms"))
            .json(&json!({"number": "1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(no_text.status(), 400);

        let bad_time = client
            .post(format!("{base}/api/v1/sms"))
            .json(&json!({"number": "1", "text": "验证码", "time": "last tuesday"}))
            .send()
            .await
            .unwrap();
        assert_eq!(bad_time.status(), 400);

        assert!(transport.sent.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn status_health_and_test_endpoints() {
    timeout(TEST_TIMEOUT, async {
        let (base, transport) = start_server(None).await;
        let client = reqwest::Client::new();

        // Root redirects to health.
        let health: Value = client
            .get(format!("{base}/"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

        client
            .post(format!("{base}/api/v1/sms"))
            .json(&json!({"number": "1", "text": "hello", "sms_id": 7}))
            .send()
            .await
            .unwrap();

        let test: Value = client
            .post(format!("{base}/api/v1/test"))
            .json(&json!({"number": "10086", "text": "验证码 246810"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(test["status"], "success");
        assert_eq!(test["matched"], json!(["otp"]));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);

        let status: Value = client
            .get(format!("{base}/api/v1/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["status"], "running");
        assert_eq!(status["rule_count"], 2);
        // The test route does not move the routed id.
        assert_eq!(status["last_processed_id"], 7);
    })
    .await
    .expect("test timed out");
}
