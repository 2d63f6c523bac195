//! Routing engine: evaluates every rule for a message and dispatches each
//! match.
//!
//! Rules are independent: a message may fire none, one or many of them, and
//! a failed dispatch never suppresses the others. The rule set is an
//! immutable snapshot behind an `Arc`; reloads swap the whole set.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::message::Message;
use crate::notify::NotificationDispatcher;
use crate::rules::{RuleSet, matches};

/// What happened to one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouteReport {
    pub sms_id: i64,
    /// Names of the rules the message fired, in rule-set order.
    pub matched: Vec<String>,
    pub delivered: usize,
    pub failed: usize,
}

/// Owns the active rule set and the last-routed message id.
pub struct RoutingEngine {
    rules: RwLock<Arc<RuleSet>>,
    dispatcher: NotificationDispatcher,
    last_routed_id: AtomicI64,
}

impl RoutingEngine {
    pub fn new(rules: RuleSet, dispatcher: NotificationDispatcher) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            dispatcher,
            last_routed_id: AtomicI64::new(0),
        }
    }

    /// Current rule-set snapshot. Holders keep a consistent view even if a
    /// reload happens meanwhile.
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Atomically replace the rule set.
    pub fn replace_rules(&self, rules: RuleSet) {
        let count = rules.len();
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(rules);
        info!(rules = count, "Rule set replaced");
    }

    /// Re-read the rule file and swap it in. On error the current set stays
    /// active.
    pub async fn reload_rules(&self, path: &Path) -> Result<usize, ConfigError> {
        let rules = RuleSet::load(path).await?;
        let count = rules.len();
        self.replace_rules(rules);
        Ok(count)
    }

    pub fn rule_count(&self) -> usize {
        self.rules().len()
    }

    /// Highest message id routed so far (0 before the first message).
    pub fn last_routed_id(&self) -> i64 {
        self.last_routed_id.load(Ordering::Relaxed)
    }

    /// Evaluate every rule and dispatch each match concurrently.
    pub async fn route(&self, message: &Message) -> RouteReport {
        let rules = self.rules();
        debug!(
            sms_id = message.id,
            sender = %message.sender,
            rules = rules.len(),
            "Routing message"
        );

        let fired: Vec<_> = rules
            .iter()
            .filter(|rule| matches(rule, &message.text))
            .collect();

        for rule in &fired {
            info!(
                sms_id = message.id,
                rule = %rule.name,
                rule_type = %rule.match_type,
                channel = rule.channel.kind(),
                "Rule matched"
            );
        }

        let outcomes = join_all(
            fired
                .iter()
                .map(|rule| self.dispatcher.dispatch(&rule.channel, message, rule)),
        )
        .await;

        self.last_routed_id.fetch_max(message.id, Ordering::Relaxed);

        let delivered = outcomes.iter().filter(|ok| **ok).count();
        let report = RouteReport {
            sms_id: message.id,
            matched: fired.iter().map(|r| r.name.clone()).collect(),
            delivered,
            failed: outcomes.len() - delivered,
        };

        if report.matched.is_empty() {
            debug!(sms_id = message.id, "No rule matched");
        }
        report
    }
}
