//! Per-rule text matching.
//!
//! Patterns are compiled once when the rule is loaded. Evaluation never
//! fails: an invalid regex or an unknown rule type simply does not match,
//! and says so in the log.

use std::fmt;

use regex::Regex;
use tracing::warn;

use crate::rules::model::RuleDefinition;

/// How a rule decides whether a message fires it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchType {
    /// Every message matches.
    All,
    /// Literal, case-sensitive substring.
    Keyword,
    /// Regular expression, matched anywhere in the text.
    Regex,
    /// A type this build does not know. Kept so the rule is reported, not lost.
    Unsupported(String),
}

impl MatchType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "keyword" => Self::Keyword,
            "regex" => Self::Regex,
            _ => Self::Unsupported(s.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::All => "all",
            Self::Keyword => "keyword",
            Self::Regex => "regex",
            Self::Unsupported(other) => other,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rule's pattern, compiled for its match type.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    All,
    Keyword(String),
    Regex(Regex),
    InvalidRegex { pattern: String, reason: String },
    Unsupported(String),
}

impl RuleMatcher {
    /// Compile `pattern` according to `match_type`. Never fails; problems
    /// are carried in the `InvalidRegex` / `Unsupported` variants.
    pub fn compile(match_type: &MatchType, pattern: &str) -> Self {
        match match_type {
            MatchType::All => Self::All,
            MatchType::Keyword => Self::Keyword(pattern.to_string()),
            MatchType::Regex => match Regex::new(pattern) {
                Ok(re) => Self::Regex(re),
                Err(e) => Self::InvalidRegex {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                },
            },
            MatchType::Unsupported(other) => Self::Unsupported(other.clone()),
        }
    }

    /// Configuration problem carried by this matcher, if any.
    pub fn problem(&self) -> Option<String> {
        match self {
            Self::InvalidRegex { pattern, reason } => {
                Some(format!("invalid regex {pattern:?}: {reason}"))
            }
            Self::Unsupported(other) => Some(format!("unsupported rule type {other:?}")),
            _ => None,
        }
    }

    /// Evaluate against `text`. `rule` is only used for diagnostics.
    pub fn is_match(&self, rule: &str, text: &str) -> bool {
        match self {
            Self::All => true,
            Self::Keyword(keyword) => text.contains(keyword.as_str()),
            Self::Regex(re) => re.is_match(text),
            Self::InvalidRegex { pattern, reason } => {
                warn!(rule, pattern = %pattern, error = %reason, "Skipping rule with invalid regex");
                false
            }
            Self::Unsupported(other) => {
                warn!(rule, rule_type = %other, "Skipping rule with unsupported type");
                false
            }
        }
    }
}

/// Does `text` fire `rule`?
pub fn matches(rule: &RuleDefinition, text: &str) -> bool {
    rule.matcher().is_match(&rule.name, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::ChannelConfig;

    fn rule(match_type: MatchType, pattern: &str) -> RuleDefinition {
        RuleDefinition::new(
            "test",
            match_type,
            pattern,
            ChannelConfig::Bark {
                url: "https://api.day.app/key".into(),
            },
        )
    }

    const SAMPLES: &[&str] = &[
        "",
        "您的验证码是123456",
        "Hello, how are you?",
        "[bank] transfer of $100.00",
        "多字节 text ✓",
    ];

    #[test]
    fn match_all_always_matches() {
        let r = rule(MatchType::All, "ignored");
        for text in SAMPLES {
            assert!(matches(&r, text), "expected match for {text:?}");
        }
    }

    #[test]
    fn keyword_is_a_literal_substring_test() {
        let keywords = ["验证码", "how", "$100.00", "HOW", "", ".*"];
        for keyword in keywords {
            let r = rule(MatchType::Keyword, keyword);
            for text in SAMPLES {
                assert_eq!(
                    matches(&r, text),
                    text.contains(keyword),
                    "keyword {keyword:?} on {text:?}"
                );
            }
        }
    }

    #[test]
    fn keyword_is_case_sensitive() {
        let r = rule(MatchType::Keyword, "Code");
        assert!(!matches(&r, "your code is 1234"));
        assert!(matches(&r, "your Code is 1234"));
    }

    #[test]
    fn regex_matches_anywhere() {
        let r = rule(MatchType::Regex, r"\d{6}");
        assert!(matches(&r, "code 123456 ok"));
        assert!(!matches(&r, "code 12345 ok"));
    }

    #[test]
    fn invalid_regex_fails_closed() {
        for pattern in ["(unclosed", "[z-a]", "*oops", r"\p{NotAClass}"] {
            let r = rule(MatchType::Regex, pattern);
            assert!(r.matcher().problem().is_some());
            for text in SAMPLES {
                assert!(!matches(&r, text));
            }
        }
    }

    #[test]
    fn unsupported_type_never_matches() {
        let r = rule(MatchType::parse("fuzzy"), "anything");
        assert_eq!(r.match_type, MatchType::Unsupported("fuzzy".into()));
        assert!(!matches(&r, "anything"));
    }

    #[test]
    fn match_type_parsing() {
        assert_eq!(MatchType::parse("all"), MatchType::All);
        assert_eq!(MatchType::parse(" Keyword "), MatchType::Keyword);
        assert_eq!(MatchType::parse("REGEX"), MatchType::Regex);
        assert_eq!(MatchType::parse("regex").to_string(), "regex");
    }
}
