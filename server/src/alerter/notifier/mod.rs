//! Notifier contract and registry.
//!
//! Notifiers deliver events to webhook recipients. Implementations
//! register under a string type tag; dispatch looks the tag up from the
//! webhook record. Delivery errors are the caller's to log; fan-out
//! continues past them.

mod slack;
mod webhook;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Event, Webhook};

pub use slack::SlackNotifier;
pub use webhook::WebhookNotifier;

/// Per-request timeout for notifier HTTP calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can deliver an event to a webhook.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, hook: &Webhook, ev: &Event) -> anyhow::Result<()>;
}

/// Type tag → notifier table consulted at dispatch.
#[derive(Default)]
pub struct NotifierRegistry {
    notifiers: RwLock<HashMap<String, Arc<dyn Notifier>>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the built-in notifiers on a shared HTTP client.
    pub fn with_builtins() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        let registry = Self::new();
        registry.register("webhook", Arc::new(WebhookNotifier::new(client.clone())));
        registry.register("slack", Arc::new(SlackNotifier::new(client)));
        registry
    }

    pub fn register(&self, tag: &str, notifier: Arc<dyn Notifier>) {
        let mut notifiers = self.notifiers.write().unwrap_or_else(|e| e.into_inner());
        notifiers.insert(tag.to_owned(), notifier);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Notifier>> {
        let notifiers = self.notifiers.read().unwrap_or_else(|e| e.into_inner());
        notifiers.get(tag).cloned()
    }
}
