//! Per-user progression state.
//!
//! State lives only in memory. `ProgressStore` is the narrow interface the
//! engine writes through; `UserLocks` serializes transitions per user.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::lesson::model::{LessonId, StepOrder};

/// Where a user is in a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProgressState {
    pub user_id: String,
    pub lesson_id: LessonId,
    pub step_order: StepOrder,
    /// True once the popup for `step_order` has been sent.
    pub guidance_issued: bool,
    pub updated_at: DateTime<Utc>,
}

impl UserProgressState {
    /// Fresh state at a step, before any guidance.
    pub fn new(user_id: impl Into<String>, lesson_id: LessonId, step_order: StepOrder) -> Self {
        Self {
            user_id: user_id.into(),
            lesson_id,
            step_order,
            guidance_issued: false,
            updated_at: Utc::now(),
        }
    }

    /// Point this state at `(lesson_id, step_order)`, keeping the guidance
    /// flag only when the position did not change.
    pub fn stamped(mut self, lesson_id: LessonId, step_order: StepOrder) -> Self {
        if self.lesson_id != lesson_id || self.step_order != step_order {
            self.lesson_id = lesson_id;
            self.step_order = step_order;
            self.guidance_issued = false;
        }
        self.updated_at = Utc::now();
        self
    }

    /// The same user, moved to `next_step` with guidance pending.
    pub fn advanced_to(mut self, next_step: StepOrder) -> Self {
        self.step_order = next_step;
        self.guidance_issued = false;
        self.updated_at = Utc::now();
        self
    }

    pub fn with_guidance_issued(mut self) -> Self {
        self.guidance_issued = true;
        self.updated_at = Utc::now();
        self
    }
}

/// Storage for progression state, keyed by user id.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Option<UserProgressState>;

    async fn put(&self, state: UserProgressState);

    /// Remove a user's state, returning what was stored.
    async fn remove(&self, user_id: &str) -> Option<UserProgressState>;
}

/// Process-local progress store.
#[derive(Default)]
pub struct InMemoryProgressStore {
    states: RwLock<HashMap<String, UserProgressState>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get(&self, user_id: &str) -> Option<UserProgressState> {
        self.states.read().await.get(user_id).cloned()
    }

    async fn put(&self, state: UserProgressState) {
        self.states
            .write()
            .await
            .insert(state.user_id.clone(), state);
    }

    async fn remove(&self, user_id: &str) -> Option<UserProgressState> {
        self.states.write().await.remove(user_id)
    }
}

/// One async mutex per user id.
///
/// The guard is held across the whole event, including oracle calls, so two
/// events for the same user apply one at a time. Different users never
/// contend beyond the brief map lookup.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(user_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop lock entries nobody is holding or waiting on.
    pub async fn prune(&self) {
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
