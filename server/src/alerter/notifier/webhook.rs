//! Generic HTTP webhook notifier: POST the JSON event.

use async_trait::async_trait;

use super::Notifier;
use crate::models::{Event, Webhook};

pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, hook: &Webhook, ev: &Event) -> anyhow::Result<()> {
        self.client
            .post(&hook.url)
            .json(ev)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
