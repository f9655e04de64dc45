//! Webhook notifier: relays popups to another service over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::Notifier;
use crate::error::NotifyError;

/// POSTs `{message, type: "popup", timestamp, user_id?}` to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// `timeout` bounds the whole request, so a relay that never answers
    /// fails the send instead of holding it open.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Http(format!("Failed to build relay client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, message: &str, user_id: Option<&str>) -> Result<(), NotifyError> {
        let mut payload = json!({
            "message": message,
            "type": "popup",
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(user_id) = user_id {
            payload["user_id"] = json!(user_id);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "Popup relay rejected message");
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(url = %self.url, "Popup relayed");
        Ok(())
    }
}
