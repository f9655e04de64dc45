//! Polling flow: walks a lesson from a starting step using one screenshot.
//!
//! Guidance is sent for each step, then the completion oracle is polled every
//! `poll_interval` until it says "YES" or `max_checks_per_step` checks have
//! been spent. The screenshot is never refreshed, so this is a demo driver,
//! not a substitute for per-event handling.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{EngineError, ErrorKind, ProgressionEngine, lookup_step, next_step};
use crate::lesson::model::{LessonId, Screenshot, Step, StepOrder};
use crate::progress::UserProgressState;

/// How often and how long the flow polls one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPolicy {
    pub poll_interval: Duration,
    /// Checks per step before giving up. `0` polls forever.
    pub max_checks_per_step: u32,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_checks_per_step: 60,
        }
    }
}

/// Pause between polls.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How a flow ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowOutcome {
    /// Every step from the start was confirmed.
    LessonComplete { lesson_id: LessonId },
    /// The flow reached a step the lesson does not have.
    End { step_order: StepOrder },
    /// The step never reached "YES" within the check budget.
    GaveUp { step_order: StepOrder, checks: u32 },
    Error { kind: ErrorKind, detail: String },
}

impl From<EngineError> for FlowOutcome {
    fn from(err: EngineError) -> Self {
        Self::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

enum StepResult {
    Confirmed,
    GaveUp(u32),
}

impl ProgressionEngine {
    /// Walk `lesson_id` from `step_order` until it completes, runs off the
    /// end, exhausts the check budget, or a collaborator fails.
    ///
    /// With a `user_id`, guidance already issued for that user's current step
    /// is not repeated and the user's state follows the flow.
    pub async fn run_flow(
        &self,
        lesson_id: LessonId,
        step_order: StepOrder,
        screenshot: &Screenshot,
        user_id: Option<&str>,
    ) -> FlowOutcome {
        match self
            .try_run_flow(lesson_id, step_order, screenshot, user_id)
            .await
        {
            Ok(outcome) => {
                info!(lesson_id, user_id = user_id.unwrap_or("-"), ?outcome, "Flow finished");
                outcome
            }
            Err(e) => {
                warn!(lesson_id, user_id = user_id.unwrap_or("-"), error = %e, "Flow failed");
                e.into()
            }
        }
    }

    async fn try_run_flow(
        &self,
        lesson_id: LessonId,
        step_order: StepOrder,
        screenshot: &Screenshot,
        user_id: Option<&str>,
    ) -> Result<FlowOutcome, EngineError> {
        let steps = self.lessons.get(lesson_id).await?;
        let mut current = step_order;

        loop {
            let Some(step) = lookup_step(&steps, current)? else {
                debug!(lesson_id, step_order = current, "Flow ran past the lesson");
                return Ok(FlowOutcome::End {
                    step_order: current,
                });
            };

            self.flow_guidance(lesson_id, step, screenshot, user_id)
                .await?;

            if let StepResult::GaveUp(checks) = self.poll_step(step, screenshot).await? {
                warn!(lesson_id, step_order = current, checks, "Step never confirmed");
                return Ok(FlowOutcome::GaveUp {
                    step_order: current,
                    checks,
                });
            }

            match next_step(&steps, current) {
                Some(next) => {
                    if let Some(user_id) = user_id {
                        let _guard = self.locks.lock(user_id).await;
                        self.progress
                            .put(UserProgressState::new(user_id, lesson_id, next))
                            .await;
                    }
                    info!(lesson_id, from = current, to = next, "Flow advanced");
                    current = next;
                }
                None => {
                    if let Some(user_id) = user_id {
                        let guard = self.locks.lock(user_id).await;
                        self.progress.remove(user_id).await;
                        drop(guard);
                        self.locks.prune().await;
                    }
                    return Ok(FlowOutcome::LessonComplete { lesson_id });
                }
            }
        }
    }

    /// Send a step's popup unless this user already received it.
    async fn flow_guidance(
        &self,
        lesson_id: LessonId,
        step: &Step,
        screenshot: &Screenshot,
        user_id: Option<&str>,
    ) -> Result<(), EngineError> {
        let Some(user_id) = user_id else {
            let message = self.generate_guidance(step, screenshot).await?;
            self.deliver(&message, None).await;
            return Ok(());
        };

        let _guard = self.locks.lock(user_id).await;
        let state = match self.progress.get(user_id).await {
            Some(existing) => existing.stamped(lesson_id, step.order),
            None => UserProgressState::new(user_id, lesson_id, step.order),
        };
        if state.guidance_issued {
            debug!(user_id, step_order = step.order, "Guidance already issued");
            return Ok(());
        }

        let message = self.generate_guidance(step, screenshot).await?;
        self.deliver(&message, Some(user_id)).await;
        self.progress.put(state.with_guidance_issued()).await;
        Ok(())
    }

    async fn poll_step(&self, step: &Step, screenshot: &Screenshot) -> Result<StepResult, EngineError> {
        let policy = &self.config.flow;
        let mut checks = 0u32;

        loop {
            self.sleeper.sleep(policy.poll_interval).await;
            checks = checks.saturating_add(1);

            let verdict = self
                .check_completion(screenshot, &step.finish_criteria)
                .await?;
            if verdict.is_met() {
                return Ok(StepResult::Confirmed);
            }

            debug!(step_order = step.order, checks, "Step not confirmed yet");
            if policy.max_checks_per_step != 0 && checks >= policy.max_checks_per_step {
                return Ok(StepResult::GaveUp(checks));
            }
        }
    }
}
