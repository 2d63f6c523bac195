//! Service configuration, read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::ingest::PollerConfig;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_RULES_PATH: &str = "/data/config/forward.yaml";
pub const DEFAULT_CURSOR_PATH: &str = "/data/state/cursor.json";
pub const DEFAULT_SOURCE_LABEL: &str = "gammu-smsd";

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Port for the push / diagnostics HTTP server.
    pub http_port: u16,
    /// Shared secret pushes must present. `None` disables the check.
    pub secret: Option<SecretString>,
    /// YAML rule file.
    pub rules_path: PathBuf,
    /// Bound on every outbound HTTP or SMTP call.
    pub notify_timeout: Duration,
    /// Poll ingestion settings; `None` when `SMSD_DB_PATH` is unset.
    pub poll: Option<PollSettings>,
}

/// Poll-path settings.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// gammu-smsd SQLite database.
    pub db_path: PathBuf,
    pub poller: PollerConfig,
    pub cursor_path: PathBuf,
    pub source_label: String,
    /// Start a fresh cursor at the newest stored message instead of 0.
    pub skip_backlog: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_port = parse_or(&get, "HTTP_PORT", DEFAULT_HTTP_PORT)?;
        let secret = get("FORWARD_SECRET").map(SecretString::from);
        let rules_path = get("FORWARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RULES_PATH));
        let notify_timeout = Duration::from_secs(parse_or(&get, "NOTIFY_TIMEOUT_SECS", 10)?);

        let poll = match get("SMSD_DB_PATH") {
            None => None,
            Some(db_path) => {
                let interval = parse_or(&get, "SMS_POLL_INTERVAL_SECS", 5u64)?;
                if interval == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "SMS_POLL_INTERVAL_SECS".into(),
                        message: "must be at least 1".into(),
                    });
                }
                Some(PollSettings {
                    db_path: PathBuf::from(db_path),
                    poller: PollerConfig {
                        interval: Duration::from_secs(interval),
                        query_timeout: Duration::from_secs(parse_or(
                            &get,
                            "SMS_QUERY_TIMEOUT_SECS",
                            10,
                        )?),
                    },
                    cursor_path: get("SMS_CURSOR_PATH")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_CURSOR_PATH)),
                    source_label: get("SMS_SOURCE_LABEL")
                        .unwrap_or_else(|| DEFAULT_SOURCE_LABEL.to_string()),
                    skip_backlog: match get("SMS_SKIP_BACKLOG") {
                        None => false,
                        Some(raw) => parse_flag("SMS_SKIP_BACKLOG", &raw)?,
                    },
                })
            }
        };

        Ok(Self {
            http_port,
            secret,
            rules_path,
            notify_timeout,
            poll,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?} is not a boolean"),
        }),
    }
}
