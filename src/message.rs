//! Inbound short message, the unit every ingestion source produces.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display format used in notification bodies.
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single received SMS.
///
/// Built once by the push handler or the poll store and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Source-assigned identifier, monotonically increasing per source.
    pub id: i64,
    /// Originating phone number or short code.
    pub sender: String,
    /// When the modem received the message.
    pub received_at: DateTime<Utc>,
    /// Decoded message text.
    pub text: String,
    /// Where the message came from (e.g. "gammu-smsd", "forward test").
    pub source_label: String,
    /// Modem / SIM identifier.
    pub device_id: String,
}

impl Message {
    pub fn new(id: i64, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            sender: sender.into(),
            received_at: Utc::now(),
            text: text.into(),
            source_label: String::new(),
            device_id: String::new(),
        }
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_source(mut self, source_label: impl Into<String>) -> Self {
        self.source_label = source_label.into();
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Receive time formatted for humans.
    pub fn received_display(&self) -> String {
        self.received_at.format(DISPLAY_TIME_FORMAT).to_string()
    }
}

/// Parse the timestamp formats modems and gammu hand us.
///
/// Accepts RFC 3339 and naive `YYYY-MM-DD HH:MM:SS` (with or without `T`,
/// with or without fractional seconds). Naive values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|ndt| ndt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_rfc3339() {
        let dt = parse_timestamp("2025-10-01T08:49:44Z").unwrap();
        assert_eq!(dt.hour(), 8);
        assert_eq!(dt.minute(), 49);
    }

    #[test]
    fn parses_gammu_naive_format() {
        let dt = parse_timestamp("2025-10-01 08:49:44").unwrap();
        assert_eq!(dt.day(), 1);
        assert_eq!(dt.second(), 44);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn builder_sets_fields() {
        let msg = Message::new(7, "10086", "hi")
            .with_source("gammu-smsd")
            .with_device("SIM1");
        assert_eq!(msg.id, 7);
        assert_eq!(msg.source_label, "gammu-smsd");
        assert_eq!(msg.device_id, "SIM1");
    }

    #[test]
    fn display_time_is_second_precision() {
        let msg = Message::new(1, "a", "b")
            .with_received_at(parse_timestamp("2025-10-01 08:49:44").unwrap());
        assert_eq!(msg.received_display(), "2025-10-01 08:49:44");
    }
}
