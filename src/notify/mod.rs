//! Popup delivery to connected clients.

pub mod hub;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

pub use hub::{PopupHub, WsMessage};
pub use webhook::WebhookNotifier;

use crate::error::NotifyError;

/// Delivers a guidance popup, optionally scoped to one user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str, user_id: Option<&str>) -> Result<(), NotifyError>;
}

/// Sends through every inner notifier; succeeds if any of them did.
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn send(&self, message: &str, user_id: Option<&str>) -> Result<(), NotifyError> {
        let mut last_err = None;
        let mut delivered = false;
        for target in &self.targets {
            match target.send(message, user_id).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    debug!(error = %e, "Popup target failed");
                    last_err = Some(e);
                }
            }
        }
        match (delivered, last_err) {
            (true, _) | (false, None) => Ok(()),
            (false, Some(e)) => Err(e),
        }
    }
}
