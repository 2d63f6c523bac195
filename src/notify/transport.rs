//! Outbound transports. The dispatcher builds an [`Outbound`] request and
//! hands it to a [`ChannelTransport`]; everything network-shaped lives here.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as MailMessage, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::DispatchError;
use crate::notify::payload::EmailPayload;

/// Implicit-TLS submission port. Anything else negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

/// Overall SMTP deadline, as a multiple of the per-operation timeout.
const SMTP_DEADLINE_FACTOR: u32 = 2;

/// Longest provider error body kept in a `DispatchError`.
const MAX_ERROR_BODY: usize = 512;

/// SMTP server and credentials for one email channel.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// One fully-assembled notification, ready to send.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// JSON `POST` to a webhook-style provider.
    Json {
        channel: &'static str,
        url: String,
        body: serde_json::Value,
    },
    /// SMTP submission.
    Email {
        smtp: SmtpSettings,
        email: EmailPayload,
    },
}

impl Outbound {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Json { channel, .. } => channel,
            Self::Email { .. } => "email",
        }
    }
}

/// Sends an assembled notification. One call, one outbound request.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn send(&self, request: &Outbound) -> Result<(), DispatchError>;
}

/// Production transport: reqwest for webhooks, lettre for SMTP. Every call
/// is bounded by `timeout`.
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Http {
                channel: "client".into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, timeout })
    }

    async fn post_json(
        &self,
        channel: &'static str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout {
                        channel: channel.into(),
                        timeout: self.timeout,
                    }
                } else {
                    DispatchError::Http {
                        channel: channel.into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Status {
                channel: channel.into(),
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        debug!(channel, status = status.as_u16(), "Provider accepted notification");
        Ok(())
    }

    async fn send_email(
        &self,
        smtp: &SmtpSettings,
        email: &EmailPayload,
    ) -> Result<(), DispatchError> {
        let smtp = smtp.clone();
        let email = email.clone();
        let timeout = self.timeout;

        // lettre's timeout is per socket operation; cap the whole exchange.
        run_blocking_bounded("email", timeout * SMTP_DEADLINE_FACTOR, move || {
            send_email_blocking(&smtp, &email, timeout)
        })
        .await
    }
}

/// Run blocking work on the blocking pool, giving up after `deadline`.
/// The thread is left to finish on its own; its result is discarded.
async fn run_blocking_bounded<F>(
    channel: &'static str,
    deadline: Duration,
    work: F,
) -> Result<(), DispatchError>
where
    F: FnOnce() -> Result<(), DispatchError> + Send + 'static,
{
    match tokio::time::timeout(deadline, tokio::task::spawn_blocking(work)).await {
        Ok(joined) => {
            joined.map_err(|e| DispatchError::Smtp(format!("{channel} task panicked: {e}")))?
        }
        Err(_) => Err(DispatchError::Timeout {
            channel: channel.into(),
            timeout: deadline,
        }),
    }
}

#[async_trait]
impl ChannelTransport for HttpTransport {
    async fn send(&self, request: &Outbound) -> Result<(), DispatchError> {
        match request {
            Outbound::Json { channel, url, body } => self.post_json(channel, url, body).await,
            Outbound::Email { smtp, email } => self.send_email(smtp, email).await,
        }
    }
}

fn send_email_blocking(
    smtp: &SmtpSettings,
    email: &EmailPayload,
    timeout: Duration,
) -> Result<(), DispatchError> {
    let creds = Credentials::new(
        smtp.username.clone(),
        smtp.password.expose_secret().to_string(),
    );

    let builder = if smtp.port == SMTPS_PORT {
        SmtpTransport::relay(&smtp.host)
    } else {
        SmtpTransport::starttls_relay(&smtp.host)
    }
    .map_err(|e| DispatchError::Smtp(format!("SMTP relay error: {e}")))?;

    let transport = builder
        .port(smtp.port)
        .credentials(creds)
        .timeout(Some(timeout))
        .build();

    let message = MailMessage::builder()
        .from(email.from.parse().map_err(|e| DispatchError::InvalidPayload {
            channel: "email".into(),
            reason: format!("Invalid from address: {e}"),
        })?)
        .to(email.to.parse().map_err(|e| DispatchError::InvalidPayload {
            channel: "email".into(),
            reason: format!("Invalid to address: {e}"),
        })?)
        .subject(email.subject.as_str())
        .body(email.body.clone())
        .map_err(|e| DispatchError::InvalidPayload {
            channel: "email".into(),
            reason: format!("Failed to build email: {e}"),
        })?;

    transport
        .send(&message)
        .map_err(|e| DispatchError::Smtp(format!("SMTP send failed: {e}")))?;

    debug!(to = %email.to, "Email submitted");
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
