//! `LessonStore` trait: where lesson steps come from.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::lesson::model::{LessonId, StepMap};

/// Backend-agnostic source of lesson steps.
#[async_trait]
pub trait LessonStore: Send + Sync {
    /// Fetch every step of a lesson, keyed by step order.
    ///
    /// An unknown lesson is an empty map, not an error.
    async fn fetch_steps(&self, lesson_id: LessonId) -> Result<StepMap, StoreError>;
}
