//! Notification dispatcher. Turns (channel, message, rule) into exactly one
//! outbound request.
//!
//! Payload assembly is pure and lives in [`build_outbound`]. Sending goes
//! through the [`ChannelTransport`] seam. Failures are logged here and
//! reported as `false`; they never propagate to the routing engine.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::DispatchError;
use crate::extract;
use crate::message::Message;
use crate::notify::payload::{
    BarkPayload, EMAIL_SUBJECT, EmailPayload, GOTIFY_PRIORITY, GotifyPayload, QqPushPayload,
    WeChatPayload,
};
use crate::notify::transport::{ChannelTransport, Outbound, SmtpSettings};
use crate::rules::{ChannelConfig, RuleDefinition};

/// Selects the payload shape by channel variant and sends it.
#[derive(Clone)]
pub struct NotificationDispatcher {
    transport: Arc<dyn ChannelTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self { transport }
    }

    /// Send one notification. Returns whether the provider accepted it.
    pub async fn dispatch(
        &self,
        channel: &ChannelConfig,
        message: &Message,
        rule: &RuleDefinition,
    ) -> bool {
        match self.try_dispatch(channel, message, rule).await {
            Ok(()) => {
                info!(
                    rule = %rule.name,
                    channel = channel.kind(),
                    sms_id = message.id,
                    "Notification sent"
                );
                true
            }
            Err(e) => {
                error!(
                    rule = %rule.name,
                    channel = channel.kind(),
                    sms_id = message.id,
                    error = %e,
                    "Notification failed"
                );
                false
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch) but surfaces the error.
    pub async fn try_dispatch(
        &self,
        channel: &ChannelConfig,
        message: &Message,
        rule: &RuleDefinition,
    ) -> Result<(), DispatchError> {
        let outbound = build_outbound(channel, message, rule)?;
        self.transport.send(&outbound).await
    }
}

/// Assemble the provider request for `channel`.
pub fn build_outbound(
    channel: &ChannelConfig,
    message: &Message,
    rule: &RuleDefinition,
) -> Result<Outbound, DispatchError> {
    match channel {
        ChannelConfig::WeChat { url } => Ok(Outbound::Json {
            channel: "wechat",
            url: url.clone(),
            body: to_json("wechat", &WeChatPayload::text(wechat_content(message, rule)))?,
        }),

        ChannelConfig::Bark { url } => Ok(Outbound::Json {
            channel: "bark",
            url: url.clone(),
            body: to_json("bark", &bark_payload(message))?,
        }),

        ChannelConfig::Gotify { url, token } => {
            let endpoint = format!("{}/message", url.trim_end_matches('/'));
            let endpoint = reqwest::Url::parse_with_params(&endpoint, &[("token", token)])
                .map_err(|e| DispatchError::InvalidPayload {
                    channel: "gotify".into(),
                    reason: format!("Invalid Gotify URL: {e}"),
                })?;
            let payload = GotifyPayload {
                title: notification_title(message),
                message: device_detail(message),
                priority: GOTIFY_PRIORITY,
            };
            Ok(Outbound::Json {
                channel: "gotify",
                url: endpoint.to_string(),
                body: to_json("gotify", &payload)?,
            })
        }

        ChannelConfig::Email {
            smtp_host,
            smtp_port,
            username,
            password,
            from,
            to,
        } => Ok(Outbound::Email {
            smtp: SmtpSettings {
                host: smtp_host.clone(),
                port: *smtp_port,
                username: username.clone(),
                password: password.clone(),
            },
            email: EmailPayload {
                from: from.clone(),
                to: to.clone(),
                subject: EMAIL_SUBJECT.to_string(),
                body: summary(message, rule),
            },
        }),

        ChannelConfig::QqPush {
            qq,
            token,
            endpoint,
        } => {
            let url = reqwest::Url::parse_with_params(endpoint, &[("token", token)]).map_err(
                |e| DispatchError::InvalidPayload {
                    channel: "qq".into(),
                    reason: format!("Invalid QQ push endpoint: {e}"),
                },
            )?;
            let text = format!("{EMAIL_SUBJECT}\n{}", summary(message, rule));
            Ok(Outbound::Json {
                channel: "qq",
                url: url.to_string(),
                body: to_json("qq", &QqPushPayload::text(qq, token, text))?,
            })
        }
    }
}

/// Bark payload, with quick-copy when the text carries a code.
pub fn bark_payload(message: &Message) -> BarkPayload {
    let payload = BarkPayload::new(notification_title(message), device_detail(message))
        .with_group(message.source_label.clone());

    if !extract::mentions_code(&message.text) {
        return payload;
    }
    match extract::extract(&message.text) {
        Some(code) => payload.with_quick_copy(code),
        None => payload,
    }
}

fn to_json<T: serde::Serialize>(
    channel: &str,
    payload: &T,
) -> Result<serde_json::Value, DispatchError> {
    serde_json::to_value(payload).map_err(|e| DispatchError::InvalidPayload {
        channel: channel.into(),
        reason: e.to_string(),
    })
}

fn notification_title(message: &Message) -> String {
    if !message.sender.is_empty() {
        message.sender.clone()
    } else if !message.source_label.is_empty() {
        message.source_label.clone()
    } else {
        "SMS".to_string()
    }
}

/// Text followed by device id, receive time and source, one per line.
fn device_detail(message: &Message) -> String {
    let received = message.received_display();
    [
        message.text.as_str(),
        message.device_id.as_str(),
        received.as_str(),
        message.source_label.as_str(),
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}

fn wechat_content(message: &Message, rule: &RuleDefinition) -> String {
    format!(
        "Rule: {}\nReceived: {}\nSender: {}\nText: {}",
        rule.name,
        message.received_display(),
        message.sender,
        message.text
    )
}

fn summary(message: &Message, rule: &RuleDefinition) -> String {
    format!(
        "Rule: {}\nReceived: {}\nSender: {}\nDevice: {}\nText: {}\nSource: {}",
        rule.name,
        message.received_display(),
        message.sender,
        message.device_id,
        message.text,
        message.source_label
    )
}
