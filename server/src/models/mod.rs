//! Core data model: metrics, per-name indexes, rules, events and the
//! directory records resolved at alert time.

mod event;
mod index;
mod metric;
mod project;
mod rule;

pub use event::{translate_comment, Event};
pub use index::Index;
pub use metric::{Metric, MetricError, MAX_METRIC_NAME_LEN, STAMP_HORIZON};
pub use project::{Project, Team, User, Webhook};
pub use rule::{any_trend_related, Level, Rule, RuleError};
