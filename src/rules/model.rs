//! Rule definitions and the YAML rule file.
//!
//! The rule file is a mapping of rule name to flat fields:
//!
//! ```yaml
//! otp:
//!   type: keyword          # all | keyword | regex
//!   rule: 验证码
//!   notify: bark           # wechat | bark | gotify | email | qq
//!   url: https://api.day.app/KEY
//! ```
//!
//! Each rule is validated on its own. A rule with missing or malformed
//! channel fields is reported and left out; the rest of the file still loads.

use std::path::Path;

use lettre::message::Mailbox;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::rules::matcher::{MatchType, RuleMatcher};

/// Default endpoint of the QQ push relay.
pub const DEFAULT_QQ_PUSH_ENDPOINT: &str = "https://wx.scjtqs.com/qq/push/pushMsg";

// ── Channel configuration ───────────────────────────────────────────

/// Where a matched message is forwarded. One variant per channel kind,
/// each carrying exactly the fields its transport needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "notify")]
pub enum ChannelConfig {
    /// WeCom (WeChat Work) group robot webhook.
    #[serde(rename = "wechat")]
    WeChat { url: String },

    /// Bark iOS push server, `https://host/DEVICE_KEY`.
    #[serde(rename = "bark")]
    Bark { url: String },

    /// Gotify server base URL plus application token.
    #[serde(rename = "gotify")]
    Gotify {
        url: String,
        #[serde(deserialize_with = "string_or_number")]
        token: String,
    },

    /// SMTP submission.
    #[serde(rename = "email")]
    Email {
        smtp_host: String,
        #[serde(deserialize_with = "port_number")]
        smtp_port: u16,
        username: String,
        #[serde(deserialize_with = "secret_string")]
        password: SecretString,
        from: String,
        to: String,
    },

    /// QQ push relay.
    #[serde(rename = "qq")]
    QqPush {
        #[serde(deserialize_with = "string_or_number")]
        qq: String,
        #[serde(deserialize_with = "string_or_number")]
        token: String,
        #[serde(default = "default_qq_endpoint")]
        endpoint: String,
    },
}

impl ChannelConfig {
    /// Short channel name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WeChat { .. } => "wechat",
            Self::Bark { .. } => "bark",
            Self::Gotify { .. } => "gotify",
            Self::Email { .. } => "email",
            Self::QqPush { .. } => "qq",
        }
    }

    /// Load-time checks the field types alone cannot express.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::WeChat { url } | Self::Bark { url } => check_url(url),
            Self::Gotify { url, token } => {
                check_url(url)?;
                non_empty("token", token)
            }
            Self::Email {
                smtp_host,
                smtp_port,
                from,
                to,
                ..
            } => {
                non_empty("smtp_host", smtp_host)?;
                if *smtp_port == 0 {
                    return Err("smtp_port must be non-zero".into());
                }
                from.parse::<Mailbox>()
                    .map_err(|e| format!("invalid from address {from:?}: {e}"))?;
                to.parse::<Mailbox>()
                    .map_err(|e| format!("invalid to address {to:?}: {e}"))?;
                Ok(())
            }
            Self::QqPush {
                qq,
                token,
                endpoint,
            } => {
                non_empty("qq", qq)?;
                non_empty("token", token)?;
                check_url(endpoint)
            }
        }
    }
}

fn check_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid url {url:?}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported url scheme {other:?}")),
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}

fn default_qq_endpoint() -> String {
    DEFAULT_QQ_PUSH_ENDPOINT.to_string()
}

// ── Lenient field decoding ──────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// YAML happily turns a QQ number or a numeric keyword into an integer.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(Scalar::into_string)
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Scalar>::deserialize(deserializer).map(|v| v.map(Scalar::into_string).unwrap_or_default())
}

/// Ports show up both as `465` and `"465"`.
fn port_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Scalar::deserialize(deserializer)?.into_string();
    raw.trim()
        .parse::<u16>()
        .map_err(|e| serde::de::Error::custom(format!("invalid port {raw:?}: {e}")))
}

fn secret_string<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    string_or_number(deserializer).map(SecretString::from)
}

// ── Rules ───────────────────────────────────────────────────────────

/// Rule entry as written in the YAML file.
#[derive(Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    match_type: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    rule: String,
    #[serde(flatten)]
    channel: ChannelConfig,
}

/// A named condition paired with the channel it forwards to.
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    /// Unique key within the rule set.
    pub name: String,
    pub match_type: MatchType,
    /// Ignored for `All`, substring for `Keyword`, expression for `Regex`.
    pub pattern: String,
    pub channel: ChannelConfig,
    matcher: RuleMatcher,
}

impl RuleDefinition {
    pub fn new(
        name: impl Into<String>,
        match_type: MatchType,
        pattern: impl Into<String>,
        channel: ChannelConfig,
    ) -> Self {
        let pattern = pattern.into();
        let matcher = RuleMatcher::compile(&match_type, &pattern);
        Self {
            name: name.into(),
            match_type,
            pattern,
            channel,
            matcher,
        }
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }
}

/// Immutable collection of rules. Reloads build a new set and swap it in.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RuleDefinition>,
}

impl RuleSet {
    /// Build a set, ordering rules by name so logs read the same every run.
    pub fn new(mut rules: Vec<RuleDefinition>) -> Self {
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Self { rules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleDefinition> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Parse a rule file. Fails only if the document itself is unreadable;
    /// per-rule problems come back alongside the rules that did load.
    pub fn from_yaml_str(src: &str) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        if src.trim().is_empty() {
            return Ok((Self::default(), Vec::new()));
        }
        let doc: serde_yaml::Value =
            serde_yaml::from_str(src).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mapping = match doc {
            serde_yaml::Value::Null => return Ok((Self::default(), Vec::new())),
            serde_yaml::Value::Mapping(m) => m,
            _ => {
                return Err(ConfigError::ParseError(
                    "rule file must be a mapping of rule name to rule".into(),
                ));
            }
        };

        let mut rules = Vec::with_capacity(mapping.len());
        let mut problems = Vec::new();

        for (key, value) in mapping {
            let name = match key {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                other => {
                    problems.push(ConfigError::InvalidRule {
                        name: format!("{other:?}"),
                        reason: "rule name must be a string".into(),
                    });
                    continue;
                }
            };

            match parse_rule(&name, value) {
                Ok(rule) => {
                    if let Some(problem) = rule.matcher().problem() {
                        // Kept in the set: it fails closed at evaluation time.
                        problems.push(ConfigError::InvalidRule {
                            name: name.clone(),
                            reason: problem,
                        });
                    }
                    rules.push(rule);
                }
                Err(reason) => problems.push(ConfigError::InvalidRule { name, reason }),
            }
        }

        Ok((Self::new(rules), problems))
    }

    /// Read and parse the rule file at `path`, logging every per-rule problem.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = tokio::fs::read_to_string(path).await?;
        let (set, problems) = Self::from_yaml_str(&src)?;
        for problem in &problems {
            warn!(path = %path.display(), "{problem}");
        }
        info!(
            path = %path.display(),
            rules = set.len(),
            problems = problems.len(),
            "Rule configuration loaded"
        );
        Ok(set)
    }
}

fn parse_rule(name: &str, value: serde_yaml::Value) -> Result<RuleDefinition, String> {
    let raw: RawRule = serde_yaml::from_value(value).map_err(|e| e.to_string())?;
    raw.channel.validate()?;
    let match_type = MatchType::parse(&raw.match_type);
    if matches!(match_type, MatchType::Keyword | MatchType::Regex) && raw.rule.is_empty() {
        return Err(format!("rule type {match_type} needs a non-empty `rule` pattern"));
    }
    Ok(RuleDefinition::new(name, match_type, raw.rule, raw.channel))
}
