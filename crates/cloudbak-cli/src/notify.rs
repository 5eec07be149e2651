//! Slack notifications
//!
//! Posts plain-text messages to a Slack incoming webhook. Delivery errors
//! are returned to the caller, which logs them and carries on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use cloudbak_core::config::NotifyConfig;
use cloudbak_core::ports::{INotifier, NoopNotifier};

const DEFAULT_USERNAME: &str = "backup-to-cloud";
const ICON: &str = ":satellite_antenna:";
const TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
    username: &'a str,
    icon_emoji: &'a str,
}

/// [`INotifier`] posting to a Slack incoming webhook
pub struct SlackNotifier {
    client: reqwest::Client,
    hook: String,
    username: String,
}

impl SlackNotifier {
    pub fn new(hook: impl Into<String>, username: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            hook: hook.into(),
            username: username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
        })
    }
}

#[async_trait::async_trait]
impl INotifier for SlackNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let message = WebhookMessage {
            text,
            username: &self.username,
            icon_emoji: ICON,
        };
        self.client
            .post(&self.hook)
            .json(&message)
            .send()
            .await
            .context("Failed to reach Slack")?
            .error_for_status()
            .context("Slack rejected the message")?;
        debug!("Slack notification sent");
        Ok(())
    }
}

/// Slack when a hook is configured, otherwise nothing
pub fn notifier_from_config(config: &NotifyConfig) -> Result<Arc<dyn INotifier>> {
    match &config.slack_hook {
        Some(hook) => Ok(Arc::new(SlackNotifier::new(
            hook.clone(),
            config.username.clone(),
        )?)),
        None => Ok(Arc::new(NoopNotifier)),
    }
}
