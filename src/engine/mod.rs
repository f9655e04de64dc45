//! Progression engine: the per-user step state machine.
//!
//! For each screenshot event the engine either sends the step's guidance
//! popup (first event at a step) or asks the completion oracle whether the
//! step is done, advancing or concluding the lesson on "YES".
//!
//! State is only written after every external call for the event has
//! succeeded, so a failed oracle or store call leaves the user where they were.

pub mod flow;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{OracleError, StoreError};
use crate::lesson::model::{LessonId, Screenshot, Step, StepMap, StepOrder};
use crate::lesson::LessonCache;
use crate::notify::Notifier;
use crate::oracle::{self, CompletionOracle, GuidanceOracle, Verdict};
use crate::progress::{ProgressStore, UserLocks, UserProgressState};

pub use flow::{FlowOutcome, FlowPolicy, Sleeper, TokioSleeper};

/// Failure category reported in `Outcome::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Lesson store unreachable or returned bad data. Retryable.
    Store,
    /// Completion or guidance oracle failed or timed out. Retryable.
    Oracle,
    /// Engine fault such as inconsistent cached lesson data.
    Internal,
}

/// Errors raised inside the engine before conversion to an `Outcome`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(_) => ErrorKind::Store,
            Self::Oracle(_) => ErrorKind::Oracle,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result of one screenshot event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// First event at this step: the popup was sent, completion not checked.
    GuidanceSent { message: String, step_order: StepOrder },
    /// The oracle said the step is not done yet.
    NotCompleted { step_order: StepOrder },
    /// Step done; the user now sits at `next_step` awaiting guidance.
    Advanced { next_step: StepOrder },
    /// Last step done; the user's state was removed.
    LessonComplete { lesson_id: LessonId },
    /// Unknown lesson or step. Nothing was changed.
    NotFound {
        lesson_id: LessonId,
        step_order: StepOrder,
    },
    /// A collaborator failed. Nothing was changed; the event may be retried.
    Error { kind: ErrorKind, detail: String },
}

impl From<EngineError> for Outcome {
    fn from(err: EngineError) -> Self {
        Self::Error {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Answer of the stateless one-shot check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub completed: bool,
    /// Raw oracle output.
    pub verdict: String,
}

/// Collaborators injected into the engine.
pub struct EngineDeps {
    pub lessons: Arc<LessonCache>,
    pub progress: Arc<dyn ProgressStore>,
    pub completion: Arc<dyn CompletionOracle>,
    pub guidance: Arc<dyn GuidanceOracle>,
    pub notifier: Arc<dyn Notifier>,
    pub sleeper: Arc<dyn Sleeper>,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on any single oracle call.
    pub oracle_timeout: Duration,
    /// Upper bound on one popup delivery. Elapsing counts as a failed delivery.
    pub delivery_timeout: Duration,
    pub flow: FlowPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(10),
            flow: FlowPolicy::default(),
        }
    }
}

/// Drives users through lessons one screenshot at a time.
pub struct ProgressionEngine {
    lessons: Arc<LessonCache>,
    progress: Arc<dyn ProgressStore>,
    completion: Arc<dyn CompletionOracle>,
    guidance: Arc<dyn GuidanceOracle>,
    notifier: Arc<dyn Notifier>,
    sleeper: Arc<dyn Sleeper>,
    locks: UserLocks,
    config: EngineConfig,
}

impl ProgressionEngine {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        Self {
            lessons: deps.lessons,
            progress: deps.progress,
            completion: deps.completion,
            guidance: deps.guidance,
            notifier: deps.notifier,
            sleeper: deps.sleeper,
            locks: UserLocks::new(),
            config,
        }
    }

    /// Handle one screenshot event for a user at `(lesson_id, step_order)`.
    ///
    /// The caller's stated position wins over what the engine remembers;
    /// citing a different step moves the user there.
    pub async fn handle_event(
        &self,
        user_id: &str,
        lesson_id: LessonId,
        step_order: StepOrder,
        screenshot: &Screenshot,
    ) -> Outcome {
        match self
            .try_handle_event(user_id, lesson_id, step_order, screenshot)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user_id, lesson_id, step_order, error = %e, "Screenshot event failed");
                if self.progress.get(user_id).await.is_none() {
                    self.locks.prune().await;
                }
                e.into()
            }
        }
    }

    async fn try_handle_event(
        &self,
        user_id: &str,
        lesson_id: LessonId,
        step_order: StepOrder,
        screenshot: &Screenshot,
    ) -> Result<Outcome, EngineError> {
        let steps = self.lessons.get(lesson_id).await?;
        let Some(step) = lookup_step(&steps, step_order)? else {
            debug!(user_id, lesson_id, step_order, "Lesson or step not found");
            return Ok(Outcome::NotFound {
                lesson_id,
                step_order,
            });
        };

        let guard = self.locks.lock(user_id).await;

        let state = match self.progress.get(user_id).await {
            Some(existing) => existing.stamped(lesson_id, step_order),
            None => UserProgressState::new(user_id, lesson_id, step_order),
        };

        if !state.guidance_issued {
            let message = self.generate_guidance(step, screenshot).await?;
            self.deliver(&message, Some(user_id)).await;
            self.progress.put(state.with_guidance_issued()).await;
            info!(user_id, lesson_id, step_order, "Guidance sent");
            return Ok(Outcome::GuidanceSent {
                message,
                step_order,
            });
        }

        let verdict = self.check_completion(screenshot, &step.finish_criteria).await?;
        if !verdict.is_met() {
            debug!(user_id, lesson_id, step_order, "Step not completed yet");
            return Ok(Outcome::NotCompleted { step_order });
        }

        match next_step(&steps, step_order) {
            Some(next) => {
                self.progress.put(state.advanced_to(next)).await;
                info!(user_id, lesson_id, from = step_order, to = next, "Step completed, advanced");
                Ok(Outcome::Advanced { next_step: next })
            }
            None => {
                self.progress.remove(user_id).await;
                drop(guard);
                self.locks.prune().await;
                info!(user_id, lesson_id, "Lesson completed");
                Ok(Outcome::LessonComplete { lesson_id })
            }
        }
    }

    /// One-shot completion check against an explicit criterion.
    ///
    /// Touches neither the lesson cache nor any user's state.
    pub async fn evaluate_once(
        &self,
        screenshot: &Screenshot,
        criterion: &str,
    ) -> Result<Evaluation, OracleError> {
        let raw = oracle::with_timeout(
            "completion",
            self.config.oracle_timeout,
            self.completion.evaluate(screenshot, criterion),
        )
        .await?;
        Ok(Evaluation {
            completed: Verdict::from_response(&raw).is_met(),
            verdict: raw.trim().to_string(),
        })
    }

    /// Current progression state of a user, if any.
    pub async fn user_state(&self, user_id: &str) -> Option<UserProgressState> {
        self.progress.get(user_id).await
    }

    async fn generate_guidance(
        &self,
        step: &Step,
        screenshot: &Screenshot,
    ) -> Result<String, OracleError> {
        oracle::with_timeout(
            "guidance",
            self.config.oracle_timeout,
            self.guidance.generate(step, screenshot),
        )
        .await
    }

    async fn check_completion(
        &self,
        screenshot: &Screenshot,
        criterion: &str,
    ) -> Result<Verdict, OracleError> {
        let raw = oracle::with_timeout(
            "completion",
            self.config.oracle_timeout,
            self.completion.evaluate(screenshot, criterion),
        )
        .await?;
        Ok(Verdict::from_response(&raw))
    }

    /// Send a popup. Delivery failures are logged and otherwise ignored.
    async fn deliver(&self, message: &str, user_id: Option<&str>) {
        let timeout = self.config.delivery_timeout;
        match tokio::time::timeout(timeout, self.notifier.send(message, user_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(user_id = user_id.unwrap_or("*"), error = %e, "Popup delivery failed");
            }
            Err(_) => {
                warn!(user_id = user_id.unwrap_or("*"), ?timeout, "Popup delivery timed out");
            }
        }
    }
}

/// Find a step, rejecting a map whose key disagrees with the step it holds.
fn lookup_step(steps: &StepMap, step_order: StepOrder) -> Result<Option<&Step>, EngineError> {
    match steps.get(&step_order) {
        Some(step) if step.order != step_order => Err(EngineError::Internal(format!(
            "step map key {step_order} holds step {}",
            step.order
        ))),
        found => Ok(found),
    }
}

fn next_step(steps: &StepMap, step_order: StepOrder) -> Option<StepOrder> {
    step_order
        .checked_add(1)
        .filter(|next| steps.contains_key(next))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted collaborators shared by engine and flow tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::NotifyError;
    use crate::progress::InMemoryProgressStore;
    use crate::store::LessonStore;

    /// Lesson store counting fetches; fails while `offline` is set.
    pub struct CountingStore {
        pub steps: StepMap,
        pub fetches: AtomicUsize,
        pub offline: AtomicBool,
    }

    #[async_trait]
    impl LessonStore for CountingStore {
        async fn fetch_steps(&self, _lesson_id: LessonId) -> Result<StepMap, StoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("lesson database unreachable".into()));
            }
            Ok(self.steps.clone())
        }
    }

    /// Completion oracle answering from a script; `Err` entries fail the call.
    #[derive(Default)]
    pub struct ScriptedCompletion {
        pub answers: Mutex<VecDeque<Result<String, String>>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedCompletion {
        pub fn push(&self, answer: Result<&str, &str>) {
            self.answers
                .lock()
                .unwrap()
                .push_back(answer.map(String::from).map_err(String::from));
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionOracle for ScriptedCompletion {
        async fn evaluate(
            &self,
            _screenshot: &Screenshot,
            _criterion: &str,
        ) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.answers.lock().unwrap().pop_front();
            match next.unwrap_or_else(|| Ok("NO".into())) {
                Ok(answer) => Ok(answer),
                Err(reason) => Err(OracleError::RequestFailed {
                    oracle: "scripted".into(),
                    reason,
                }),
            }
        }
    }

    /// Guidance echoing the description, optionally failing every call.
    #[derive(Default)]
    pub struct EchoGuidance {
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl GuidanceOracle for EchoGuidance {
        async fn generate(
            &self,
            step: &Step,
            _screenshot: &Screenshot,
        ) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OracleError::RequestFailed {
                    oracle: "echo".into(),
                    reason: "guidance down".into(),
                });
            }
            Ok(step.description.clone())
        }
    }

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, Option<String>)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str, user_id: Option<&str>) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((message.to_string(), user_id.map(String::from)));
            if self.fail {
                Err(NotifyError::NoSubscribers)
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingSleeper {
        pub sleeps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    pub fn lesson(orders: &[StepOrder]) -> StepMap {
        orders
            .iter()
            .map(|&o| {
                (
                    o,
                    Step::new(
                        o,
                        Some(format!("Step {o}")),
                        Some(format!("Do step {o}")),
                        Some(format!("Step {o} is done")),
                    ),
                )
            })
            .collect()
    }

    pub struct Harness {
        pub engine: ProgressionEngine,
        pub store: Arc<CountingStore>,
        pub progress: Arc<InMemoryProgressStore>,
        pub completion: Arc<ScriptedCompletion>,
        pub guidance: Arc<EchoGuidance>,
        pub notifier: Arc<RecordingNotifier>,
        pub sleeper: Arc<RecordingSleeper>,
    }

    pub struct HarnessBuilder {
        steps: StepMap,
        store_offline: bool,
        guidance: EchoGuidance,
        notifier: RecordingNotifier,
        config: EngineConfig,
    }

    impl HarnessBuilder {
        pub fn failing_store(mut self) -> Self {
            self.store_offline = true;
            self
        }

        pub fn failing_guidance(mut self) -> Self {
            self.guidance.fail = true;
            self
        }

        pub fn failing_notifier(mut self) -> Self {
            self.notifier.fail = true;
            self
        }

        pub fn config(mut self, config: EngineConfig) -> Self {
            self.config = config;
            self
        }

        pub fn build(self) -> Harness {
            let store = Arc::new(CountingStore {
                steps: self.steps,
                fetches: AtomicUsize::new(0),
                offline: AtomicBool::new(self.store_offline),
            });
            let progress = Arc::new(InMemoryProgressStore::new());
            let completion = Arc::new(ScriptedCompletion::default());
            let guidance = Arc::new(self.guidance);
            let notifier = Arc::new(self.notifier);
            let sleeper = Arc::new(RecordingSleeper::default());

            let engine = ProgressionEngine::new(
                EngineDeps {
                    lessons: Arc::new(LessonCache::new(store.clone())),
                    progress: progress.clone(),
                    completion: completion.clone(),
                    guidance: guidance.clone(),
                    notifier: notifier.clone(),
                    sleeper: sleeper.clone(),
                },
                self.config,
            );

            Harness {
                engine,
                store,
                progress,
                completion,
                guidance,
                notifier,
                sleeper,
            }
        }
    }

    pub fn harness(steps: StepMap) -> HarnessBuilder {
        HarnessBuilder {
            steps,
            store_offline: false,
            guidance: EchoGuidance::default(),
            notifier: RecordingNotifier::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn shot() -> Screenshot {
        Screenshot::from_base64("aW1hZ2U=")
    }
}
