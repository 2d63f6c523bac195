//! Wire payloads for each notification provider.

use serde::Serialize;

/// Gotify priority for forwarded SMS. Codes expire fast, so high urgency.
pub const GOTIFY_PRIORITY: u8 = 9;

/// Subject line of forwarded emails.
pub const EMAIL_SUBJECT: &str = "SMS notification";

/// Bark interruption level used for messages carrying a code.
pub const BARK_LEVEL_TIME_SENSITIVE: &str = "timeSensitive";

/// WeCom group robot text message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeChatPayload {
    pub msgtype: String,
    pub text: WeChatText,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeChatText {
    pub content: String,
}

impl WeChatPayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            msgtype: "text".into(),
            text: WeChatText {
                content: content.into(),
            },
        }
    }
}

/// Bark push request. Optional fields are omitted when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BarkPayload {
    pub title: String,
    pub body: String,
    #[serde(rename = "isArchive", skip_serializing_if = "Option::is_none")]
    pub is_archive: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Text offered for one-tap copy on the device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy: Option<String>,
    #[serde(rename = "autoCopy", skip_serializing_if = "Option::is_none")]
    pub auto_copy: Option<u8>,
}

impl BarkPayload {
    /// Archived, informational notification.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            is_archive: Some(1),
            ..Default::default()
        }
    }

    /// Turn this into a transient, actionable alert offering `code` for copy.
    pub fn with_quick_copy(mut self, code: impl Into<String>) -> Self {
        self.copy = Some(code.into());
        self.auto_copy = Some(1);
        self.is_archive = Some(0);
        self.level = Some(BARK_LEVEL_TIME_SENSITIVE.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        let group = group.into();
        if !group.is_empty() {
            self.group = Some(group);
        }
        self
    }
}

/// Gotify `POST /message` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GotifyPayload {
    pub title: String,
    pub message: String,
    pub priority: u8,
}

/// QQ push relay envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QqPushPayload {
    pub qq: String,
    pub token: String,
    pub content: Vec<QqPushContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QqPushContent {
    pub msgtype: String,
    pub text: String,
}

impl QqPushPayload {
    pub fn text(qq: impl Into<String>, token: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            qq: qq.into(),
            token: token.into(),
            content: vec![QqPushContent {
                msgtype: "text".into(),
                text: text.into(),
            }],
        }
    }
}

/// A single plain-text email.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailPayload {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}
