//! Alert events and rule-comment translation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Index, Metric, Project, Rule, Team, User, Webhook};

/// A fired alert.
///
/// Carries value snapshots of everything the notification needs; the
/// canonical rule lives in the rule cache and is copied here so that
/// later rule edits cannot rewrite history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stable id: hex sha256 of `name:stamp:rule_id`.
    pub id: String,
    pub metric: Metric,
    pub index: Index,
    pub rule: Rule,
    /// Resolved at alert time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    /// The recipient this serialization is addressed to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Every user the alert goes out to, set once at dispatch.
    #[serde(rename = "alarmUsers", skip_serializing_if = "Option::is_none")]
    pub alarm_users: Option<Vec<User>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<Webhook>,
    /// Rule comment with `$N` markers expanded from the metric name.
    #[serde(rename = "ruleTranslatedComment")]
    pub rule_translated_comment: String,
}

impl Event {
    /// Build an event from the detection snapshots.
    pub fn new(metric: Metric, index: Index, rule: Rule) -> Self {
        let id = event_id(&metric.name, metric.stamp, rule.id);
        let rule_translated_comment = translate_comment(&rule.pattern, &metric.name, &rule.comment);
        Self {
            id,
            metric,
            index,
            rule,
            project: None,
            team: None,
            user: None,
            alarm_users: None,
            webhook: None,
            rule_translated_comment,
        }
    }
}

/// Digest a stable event id from the triggering triple.
fn event_id(name: &str, stamp: u32, rule_id: i32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{name}:{stamp}:{rule_id}"));
    hex::encode(hasher.finalize())
}

/// Replace `$1, $2, …` in a rule comment with the metric name segments
/// standing at the pattern's `*` positions, left to right.
///
/// When pattern and name disagree on segment count the comment passes
/// through unchanged.
pub fn translate_comment(pattern: &str, name: &str, comment: &str) -> String {
    let pattern_parts: Vec<&str> = pattern.split('.').collect();
    let name_parts: Vec<&str> = name.split('.').collect();
    if pattern_parts.len() != name_parts.len() {
        return comment.to_owned();
    }
    let mut out = comment.to_owned();
    let mut n = 0;
    for (pattern_part, name_part) in pattern_parts.iter().zip(&name_parts) {
        if *pattern_part == "*" {
            n += 1;
            let marker = format!("${n}");
            out = out.replacen(&marker, name_part, 1);
        }
    }
    out
}
