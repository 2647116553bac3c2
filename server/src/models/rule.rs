//! Alerting rules and the rule test.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Index, Metric};
use crate::util::trie::WILDCARD;

/// Rule severity. Users and webhooks subscribe to a minimum level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Low,
    Middle,
    High,
}

/// Pattern validation failures, caught at rule ingestion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule pattern is empty")]
    PatternEmpty,
    #[error("rule pattern contains whitespace")]
    PatternHasWhitespace,
    #[error("rule pattern mixes `*` with literal text in one segment")]
    PatternFormat,
}

/// A user-authored wildcard alerting condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule id, unique across the cache.
    pub id: i32,
    /// Owning project.
    #[serde(rename = "projectID")]
    pub project_id: i32,
    /// Dot-segmented wildcard pattern; `*` matches one segment.
    pub pattern: String,
    /// Fire on upward trend.
    #[serde(rename = "trendUp")]
    pub trend_up: bool,
    /// Fire on downward trend.
    #[serde(rename = "trendDown")]
    pub trend_down: bool,
    /// Upper value threshold; zero disables it.
    #[serde(rename = "thresholdMax")]
    pub threshold_max: f64,
    /// Lower value threshold; zero disables it.
    #[serde(rename = "thresholdMin")]
    pub threshold_min: f64,
    /// Severity.
    pub level: Level,
    /// Disabled flag; see `disabled_for`.
    pub disabled: bool,
    /// Minutes the disable lasts from `disabled_at`; non-positive means
    /// disabled until re-enabled.
    #[serde(rename = "disabledFor")]
    pub disabled_for: i64,
    /// When the rule was disabled.
    #[serde(rename = "disabledAt")]
    pub disabled_at: Option<DateTime<Utc>>,
    /// Fire a synthetic alert when the metric stops arriving.
    #[serde(rename = "trackIdle")]
    pub track_idle: bool,
    /// Opt this rule's metrics out of gap zero-filling.
    #[serde(rename = "neverFillZero")]
    pub never_fill_zero: bool,
    /// Free-form comment; `$1, $2, …` expand to wildcard captures.
    pub comment: String,
}

impl Rule {
    /// True if the rule condition depends on the smoothed score.
    pub fn is_trend_related(&self) -> bool {
        self.trend_up || self.trend_down
    }

    /// Validate the pattern: non-empty, no whitespace, and `*` only as a
    /// whole segment.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.pattern.is_empty() {
            return Err(RuleError::PatternEmpty);
        }
        if self.pattern.chars().any(char::is_whitespace) {
            return Err(RuleError::PatternHasWhitespace);
        }
        for segment in self.pattern.split('.') {
            if segment.contains('*') && segment != WILDCARD {
                return Err(RuleError::PatternFormat);
            }
        }
        Ok(())
    }

    /// True while a temporary disable is in effect.
    fn is_disabled(&self, now: DateTime<Utc>) -> bool {
        if !self.disabled {
            return false;
        }
        if self.disabled_for <= 0 {
            return true;
        }
        match self.disabled_at {
            Some(at) => now < at + Duration::minutes(self.disabled_for),
            None => true,
        }
    }

    /// Test a detected metric and its index against this rule.
    ///
    /// Trend conditions read the smoothed `index.score`; value conditions
    /// read `metric.value`. `default_max`/`default_min` are the
    /// first-matching entries of the configured default threshold tables
    /// for this metric name, if any.
    pub fn test(
        &self,
        m: &Metric,
        idx: &Index,
        default_max: Option<f64>,
        default_min: Option<f64>,
    ) -> bool {
        if self.is_disabled(Utc::now()) {
            return false;
        }
        if self.track_idle && m.value == 0.0 && m.average == 0.0 && m.score == 0.0 {
            return true;
        }
        let mut ok = false;
        if self.trend_up {
            ok = idx.score > 1.0;
            if self.threshold_max != 0.0 {
                ok = ok && m.value >= self.threshold_max;
            } else if let Some(max) = default_max {
                ok = ok && m.value >= max;
            }
        }
        if !ok && !self.trend_up && self.threshold_max > 0.0 {
            ok = m.value >= self.threshold_max;
        }
        if !ok && self.trend_down {
            ok = idx.score < -1.0;
            if self.threshold_min != 0.0 {
                ok = ok && m.value <= self.threshold_min;
            } else if let Some(min) = default_min {
                ok = ok && m.value <= min;
            }
        }
        if !ok && !self.trend_down && self.threshold_min > 0.0 {
            ok = m.value <= self.threshold_min;
        }
        ok
    }
}

/// True if any rule in the slice is trend related.
pub fn any_trend_related(rules: &[Rule]) -> bool {
    rules.iter().any(Rule::is_trend_related)
}
