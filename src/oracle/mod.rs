//! Oracle interfaces: the completion classifier and the guidance generator.
//!
//! Both are external services from the engine's point of view. Backends are
//! injected as trait objects; `vision` holds the LLM-backed ones.

pub mod vision;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::OracleError;
use crate::lesson::model::{Screenshot, Step};

pub use vision::{VisionCompletionOracle, VisionGuidanceOracle};

/// The only answer that counts as "criterion met".
pub const AFFIRMATIVE: &str = "YES";

/// Judges whether a screenshot satisfies a completion criterion.
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    /// Return the raw verdict text, typically "YES" or "NO".
    async fn evaluate(
        &self,
        screenshot: &Screenshot,
        criterion: &str,
    ) -> Result<String, OracleError>;
}

/// Produces the popup text shown when a step begins.
#[async_trait]
pub trait GuidanceOracle: Send + Sync {
    async fn generate(&self, step: &Step, screenshot: &Screenshot) -> Result<String, OracleError>;
}

/// Interpreted completion verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Met,
    NotMet,
}

impl Verdict {
    /// Only a trimmed, case-insensitive "YES" is `Met`; anything else,
    /// including explanations or fallback sentinels, is `NotMet`.
    pub fn from_response(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case(AFFIRMATIVE) {
            Self::Met
        } else {
            Self::NotMet
        }
    }

    pub fn is_met(self) -> bool {
        matches!(self, Self::Met)
    }
}

/// Guidance that shows the step description verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughGuidance;

#[async_trait]
impl GuidanceOracle for PassthroughGuidance {
    async fn generate(&self, step: &Step, _screenshot: &Screenshot) -> Result<String, OracleError> {
        Ok(step.description.clone())
    }
}

/// Bound an oracle call; an elapsed deadline becomes `OracleError::Timeout`.
pub async fn with_timeout<T>(
    oracle: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T, OracleError>>,
) -> Result<T, OracleError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| OracleError::Timeout {
            oracle: oracle.to_string(),
            timeout,
        })?
}
