// Gate notifications - operator awareness only, never run state
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::error::EngineError;
use crate::models::RunStage;

/// Summary pushed to operators when a run suspends at a gate or finishes.
/// The resume token is what the approval UI feeds back into the resume
/// entry point.
#[derive(Debug, Clone, Serialize)]
pub struct GateNotification {
    pub run_id: String,
    pub stage: RunStage,
    pub resume_token: String,
    pub summary: String,
    pub video_url: Option<String>,
}

/// Fire-and-forget delivery. A failed notification is logged by the caller
/// and otherwise ignored.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, note: &GateNotification) -> Result<(), EngineError>;
}

/// Posts the notification JSON to a configured webhook, typically a chat-bot
/// relay that renders it for reviewers.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotifier {
    async fn notify(&self, note: &GateNotification) -> Result<(), EngineError> {
        let response = self
            .client
            .post(&self.url)
            .json(note)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| EngineError::service("notify", e))?;

        if !response.status().is_success() {
            return Err(EngineError::Service {
                service: "notify",
                message: format!("webhook returned HTTP {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl NotificationChannel for NoopNotifier {
    async fn notify(&self, _note: &GateNotification) -> Result<(), EngineError> {
        Ok(())
    }
}
