//! Vision LLM client for the screenshot oracles.
//!
//! Speaks the Anthropic Messages API directly over reqwest: one user turn
//! carrying a base64 image block and a text block, answered with text.
//!
//! This is not routed through rig-core. The provider seam this service's
//! stack uses passes chat turns as plain strings, which leaves no place for
//! the screenshot block, and the oracle tests need `base_url` pointed at a
//! local stub. The wire types below cover exactly that one request shape.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OracleError;
use crate::lesson::model::Screenshot;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for creating a vision client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

impl LlmConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

// ── Client ──────────────────────────────────────────────────────────────

/// Thin client for screenshot + prompt completions.
pub struct VisionClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl VisionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    #[cfg(test)]
    pub(crate) fn model_name(&self) -> &str {
        &self.config.model
    }

    /// Send one screenshot with an instruction and return the first text block.
    ///
    /// `oracle` names the caller in errors and logs.
    pub async fn complete(
        &self,
        oracle: &str,
        system: &str,
        screenshot: &Screenshot,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, OracleError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens,
            system,
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: &screenshot.media_type,
                            data: &screenshot.data,
                        },
                    },
                    ContentBlock::Text { text: prompt },
                ],
            }],
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| OracleError::RequestFailed {
                oracle: oracle.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(OracleError::AuthFailed {
                oracle: oracle.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::RequestFailed {
                oracle: oracle.to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| OracleError::InvalidResponse {
                    oracle: oracle.to_string(),
                    reason: e.to_string(),
                })?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .find_map(|block| block.text.filter(|t| !t.trim().is_empty()))
            .ok_or_else(|| OracleError::InvalidResponse {
                oracle: oracle.to_string(),
                reason: "no text content in response".into(),
            })?;

        debug!(oracle, model = %self.config.model, response = %text, "Vision model responded");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_image_then_text() {
        let shot = Screenshot::from_base64("AAAA");
        let request = MessagesRequest {
            model: "m",
            max_tokens: 8,
            system: "sys",
            messages: vec![RequestMessage {
                role: "user",
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: &shot.media_type,
                            data: &shot.data,
                        },
                    },
                    ContentBlock::Text { text: "done?" },
                ],
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["type"], "base64");
        assert_eq!(content[0]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[0]["source"]["data"], "AAAA");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[1]["text"], "done?");
    }

    #[test]
    fn config_overrides_base_url() {
        let config = LlmConfig::new(SecretString::from("k"), "model-x")
            .with_base_url("http://127.0.0.1:9999");
        assert_eq!(config.base_url, "http://127.0.0.1:9999");
        assert_eq!(VisionClient::new(config).model_name(), "model-x");
    }
}
