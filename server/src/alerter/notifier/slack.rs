//! Slack notifier: one attachment per event, colored per project.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::Notifier;
use crate::models::{Event, Webhook};

const BOT_NAME: &str = "argus-bot";

pub struct SlackNotifier {
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, hook: &Webhook, ev: &Event) -> anyhow::Result<()> {
        let project_name = ev.project.as_ref().map_or("", |p| p.name.as_str());
        let subject = if ev.rule_translated_comment.is_empty() {
            ev.metric.name.clone()
        } else {
            ev.rule_translated_comment.clone()
        };
        let text = format!(
            "{} value={:.3} average={:.3} trend={:.3}",
            ev.metric.name, ev.metric.value, ev.index.average, ev.index.score
        );
        let payload = json!({
            "username": BOT_NAME,
            "attachments": [{
                "title": format!("{project_name} - {subject}"),
                "text": text,
                "color": project_color(project_name),
            }],
        });
        self.client
            .post(&hook.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// A stable per-project attachment color.
fn project_color(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    format!("#{}", hex::encode(&digest[..3]))
}
