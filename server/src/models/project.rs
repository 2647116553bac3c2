//! Directory records: projects, teams, users and webhooks.
//!
//! These are owned by the in-process directory; the relational admin
//! store behind them is an external collaborator.

use serde::{Deserialize, Serialize};

use super::Level;

/// A rules group with its own quiet hours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i32,
    pub name: String,
    #[serde(rename = "teamID")]
    pub team_id: i32,
    /// Use the project's own silent range instead of the global default.
    #[serde(rename = "enableSilent")]
    pub enable_silent: bool,
    /// Silent range start hour, inclusive, `0..=23`.
    #[serde(rename = "silentTimeStart")]
    pub silent_time_start: u32,
    /// Silent range end hour, exclusive, `0..=23`.
    #[serde(rename = "silentTimeEnd")]
    pub silent_time_end: u32,
}

/// A projects group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i32,
    pub name: String,
}

/// An alert recipient reached through the external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub name: String,
    /// Minimum rule severity this user wants to hear about.
    #[serde(rename = "ruleLevel")]
    pub rule_level: Level,
    /// Universal users receive every project's alerts.
    pub universal: bool,
}

/// An alert recipient reached through a registered notifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i32,
    pub name: String,
    /// Notifier type tag looked up in the registry at dispatch.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    /// Minimum rule severity delivered to this hook.
    #[serde(rename = "ruleLevel")]
    pub rule_level: Level,
    /// Universal webhooks receive every project's alerts.
    pub universal: bool,
}
