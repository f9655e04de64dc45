//! LLM-backed oracles that look at the screenshot.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{CompletionOracle, GuidanceOracle};
use crate::error::OracleError;
use crate::lesson::model::{Screenshot, Step};
use crate::llm::VisionClient;

const COMPLETION_SYSTEM_PROMPT: &str = "You decide whether a user has completed a task. \
Compare the screenshot against the finish criteria. \
Answer with ONLY \"YES\" if the screenshot matches the finish criteria, otherwise ONLY \"NO\". \
Do not explain. Only say YES when the criteria are clearly met.";

const GUIDANCE_SYSTEM_PROMPT: &str = "You write short popup messages that guide a user through \
one step of a lesson. Look at the user's current screenshot and the step description. \
Write 2-3 friendly, actionable sentences that point at concrete things visible on screen \
(for example \"Click the blue Share button in the top right\"). Output only the popup text.";

/// Completion oracle asking a vision model for a YES/NO verdict.
pub struct VisionCompletionOracle {
    client: Arc<VisionClient>,
}

impl VisionCompletionOracle {
    pub fn new(client: Arc<VisionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CompletionOracle for VisionCompletionOracle {
    async fn evaluate(
        &self,
        screenshot: &Screenshot,
        criterion: &str,
    ) -> Result<String, OracleError> {
        let prompt =
            format!("FINISH CRITERIA: {criterion}\n\nIs the task completed? Answer YES or NO.");
        let verdict = self
            .client
            .complete("completion", COMPLETION_SYSTEM_PROMPT, screenshot, &prompt, 8)
            .await?;
        info!(verdict = %verdict.trim(), "Completion verdict");
        Ok(verdict)
    }
}

/// Guidance oracle that tailors the step description to the screenshot.
pub struct VisionGuidanceOracle {
    client: Arc<VisionClient>,
}

impl VisionGuidanceOracle {
    pub fn new(client: Arc<VisionClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GuidanceOracle for VisionGuidanceOracle {
    async fn generate(&self, step: &Step, screenshot: &Screenshot) -> Result<String, OracleError> {
        let prompt = format!(
            "STEP {order}: {name}\nSTEP DESCRIPTION: {description}\n\n\
             Look at the screenshot and write the popup that guides the user through this step.",
            order = step.order,
            name = step.name,
            description = step.description,
        );
        let message = self
            .client
            .complete("guidance", GUIDANCE_SYSTEM_PROMPT, screenshot, &prompt, 256)
            .await?;
        Ok(message.trim().to_string())
    }
}
