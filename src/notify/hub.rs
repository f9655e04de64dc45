//! Popup hub: broadcast fan-out of popups to WebSocket clients.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use super::Notifier;
use crate::error::NotifyError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Message from server → WebSocket client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Sent once after the socket opens.
    Connected { user_id: Option<String> },
    /// A guidance popup. `user_id: None` means every client should show it.
    PopupMessage {
        message: String,
        user_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl WsMessage {
    /// Whether a client subscribed as `subscriber` should receive this.
    ///
    /// Clients without a user id see every popup.
    pub fn is_for(&self, subscriber: Option<&str>) -> bool {
        match (self, subscriber) {
            (Self::Connected { .. }, _) => true,
            (_, None) => true,
            (Self::PopupMessage { user_id: None, .. }, Some(_)) => true,
            (Self::PopupMessage { user_id: Some(target), .. }, Some(me)) => target == me,
        }
    }
}

/// In-process popup broadcaster. Each WS client subscribes and filters by user.
pub struct PopupHub {
    tx: broadcast::Sender<WsMessage>,
}

impl PopupHub {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self { tx })
    }

    /// Subscribe to popups. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }

    /// Broadcast a popup. Fails when no client is listening.
    pub fn publish(&self, message: &str, user_id: Option<&str>) -> Result<(), NotifyError> {
        let popup = WsMessage::PopupMessage {
            message: message.to_string(),
            user_id: user_id.map(String::from),
            timestamp: Utc::now(),
        };
        let receivers = self.tx.send(popup).map_err(|_| NotifyError::NoSubscribers)?;
        info!(
            user_id = user_id.unwrap_or("*"),
            receivers,
            preview = %message.chars().take(50).collect::<String>(),
            "Popup broadcast"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for PopupHub {
    async fn send(&self, message: &str, user_id: Option<&str>) -> Result<(), NotifyError> {
        self.publish(message, user_id)
    }
}
