//! The in-process admin directory.
//!
//! Holds projects, teams, users and webhooks plus their memberships, and
//! answers the alerter's resolution queries. The relational admin store
//! that feeds it is an external collaborator; whatever loads or edits
//! that data keeps this directory in sync through the upsert methods.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{Project, Team, User, Webhook};

#[derive(Default)]
struct Inner {
    projects: HashMap<i32, Project>,
    teams: HashMap<i32, Team>,
    users: HashMap<i32, User>,
    webhooks: HashMap<i32, Webhook>,
    /// project id → member user ids.
    project_users: HashMap<i32, Vec<i32>>,
    /// project id → subscribed webhook ids.
    project_webhooks: HashMap<i32, Vec<i32>>,
}

/// Concurrent read-mostly directory of alert recipients.
#[derive(Default)]
pub struct Directory {
    inner: RwLock<Inner>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_project(&self, project: Project) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.projects.insert(project.id, project);
    }

    pub fn upsert_team(&self, team: Team) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.teams.insert(team.id, team);
    }

    pub fn upsert_user(&self, user: User) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.users.insert(user.id, user);
    }

    pub fn upsert_webhook(&self, webhook: Webhook) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.webhooks.insert(webhook.id, webhook);
    }

    /// Add a user to a project's recipients.
    pub fn link_user(&self, project_id: i32, user_id: i32) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let members = inner.project_users.entry(project_id).or_default();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
    }

    /// Subscribe a webhook to a project.
    pub fn link_webhook(&self, project_id: i32, webhook_id: i32) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let hooks = inner.project_webhooks.entry(project_id).or_default();
        if !hooks.contains(&webhook_id) {
            hooks.push(webhook_id);
        }
    }

    /// Copy of a project.
    pub fn project(&self, id: i32) -> Option<Project> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.projects.get(&id).cloned()
    }

    /// Copy of a team.
    pub fn team(&self, id: i32) -> Option<Team> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.teams.get(&id).cloned()
    }

    /// The project's users merged with the universal users.
    pub fn users_for_project(&self, project_id: i32) -> Vec<User> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut users: Vec<User> = inner
            .project_users
            .get(&project_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.users.get(id).cloned())
            .collect();
        for user in inner.users.values() {
            if user.universal && !users.iter().any(|u| u.id == user.id) {
                users.push(user.clone());
            }
        }
        users
    }

    /// The project's webhooks merged with the universal webhooks.
    pub fn webhooks_for_project(&self, project_id: i32) -> Vec<Webhook> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut hooks: Vec<Webhook> = inner
            .project_webhooks
            .get(&project_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.webhooks.get(id).cloned())
            .collect();
        for hook in inner.webhooks.values() {
            if hook.universal && !hooks.iter().any(|h| h.id == hook.id) {
                hooks.push(hook.clone());
            }
        }
        hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Level;

    #[test]
    fn test_resolution() {
        let dir = Directory::new();
        dir.upsert_team(Team {
            id: 1,
            name: "infra".into(),
        });
        dir.upsert_project(Project {
            id: 10,
            name: "gateway".into(),
            team_id: 1,
            ..Project::default()
        });
        dir.upsert_user(User {
            id: 100,
            name: "alice".into(),
            rule_level: Level::Low,
            universal: false,
        });
        dir.upsert_user(User {
            id: 101,
            name: "oncall".into(),
            rule_level: Level::High,
            universal: true,
        });
        dir.link_user(10, 100);

        assert_eq!(dir.project(10).unwrap().name, "gateway");
        assert_eq!(dir.team(1).unwrap().name, "infra");

        let users = dir.users_for_project(10);
        let mut ids: Vec<i32> = users.iter().map(|u| u.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![100, 101]);

        // Universal users reach projects they are not members of.
        let other = dir.users_for_project(99);
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].id, 101);
    }

    #[test]
    fn test_webhooks_merge_universal_without_duplicates() {
        let dir = Directory::new();
        dir.upsert_webhook(Webhook {
            id: 5,
            name: "ops".into(),
            kind: "webhook".into(),
            url: "http://example.test/hook".into(),
            rule_level: Level::Low,
            universal: true,
        });
        dir.link_webhook(10, 5);
        let hooks = dir.webhooks_for_project(10);
        assert_eq!(hooks.len(), 1);
    }
}
