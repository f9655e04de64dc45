//! Lesson persistence: SQLite-backed steps with a course-file fallback.

pub mod course_file;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

pub use course_file::CourseFileStore;
pub use libsql_backend::LibSqlLessonStore;
pub use traits::LessonStore;

use crate::error::StoreError;
use crate::lesson::model::{LessonId, StepMap};

/// Tries the primary store first and falls back to the secondary when the
/// primary has no steps for the lesson or cannot be reached.
pub struct FallbackStore {
    primary: Arc<dyn LessonStore>,
    secondary: Arc<dyn LessonStore>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn LessonStore>, secondary: Arc<dyn LessonStore>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl LessonStore for FallbackStore {
    async fn fetch_steps(&self, lesson_id: LessonId) -> Result<StepMap, StoreError> {
        match self.primary.fetch_steps(lesson_id).await {
            Ok(steps) if !steps.is_empty() => Ok(steps),
            Ok(_) => self.secondary.fetch_steps(lesson_id).await,
            Err(primary_err) => {
                warn!(lesson_id, error = %primary_err, "Primary lesson store failed, using fallback");
                self.secondary.fetch_steps(lesson_id).await.map_err(|e| {
                    StoreError::Connection(format!("primary: {primary_err}; fallback: {e}"))
                })
            }
        }
    }
}
