//! Routing rules: configuration model and per-rule matching.

pub mod matcher;
pub mod model;

pub use matcher::{MatchType, RuleMatcher, matches};
pub use model::{ChannelConfig, RuleDefinition, RuleSet};
