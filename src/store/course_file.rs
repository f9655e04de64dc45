//! JSON course file: lessons generated offline and shipped as one file.
//!
//! The file is an array of chapters, each chapter being one lesson:
//!
//! ```json
//! [{"chapter": 1, "steps": [{"step": 1, "title": "...", "instruction": "...", "finished_criteria": "..."}]}]
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::error::StoreError;
use crate::lesson::model::{LessonId, Step, StepMap, StepOrder};
use crate::store::traits::LessonStore;

#[derive(Debug, Deserialize)]
struct Chapter {
    chapter: LessonId,
    #[serde(default)]
    steps: Vec<ChapterStep>,
}

#[derive(Debug, Deserialize)]
struct ChapterStep {
    step: Option<StepOrder>,
    title: Option<String>,
    instruction: Option<String>,
    finished_criteria: Option<String>,
}

/// Lesson store backed by a parsed course file held in memory.
pub struct CourseFileStore {
    lessons: HashMap<LessonId, StepMap>,
}

impl CourseFileStore {
    /// Read and parse a course file.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let store = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            lessons = store.lessons.len(),
            "Course file loaded"
        );
        Ok(store)
    }

    /// Parse a course from JSON text. Steps without a step number are skipped.
    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let chapters: Vec<Chapter> =
            serde_json::from_str(raw).map_err(|e| StoreError::Parse(format!("course file: {e}")))?;

        let lessons = chapters
            .into_iter()
            .map(|chapter| {
                let steps = chapter
                    .steps
                    .into_iter()
                    .filter_map(|s| {
                        let order = s.step.filter(|o| *o > 0)?;
                        Some((
                            order,
                            Step::new(order, s.title, s.instruction, s.finished_criteria),
                        ))
                    })
                    .collect();
                (chapter.chapter, steps)
            })
            .collect();

        Ok(Self { lessons })
    }
}

#[async_trait]
impl LessonStore for CourseFileStore {
    async fn fetch_steps(&self, lesson_id: LessonId) -> Result<StepMap, StoreError> {
        Ok(self.lessons.get(&lesson_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const COURSE: &str = r#"[
        {"chapter": 1, "title": "Frames", "steps": [
            {"step": 1, "title": "Create a frame", "instruction": "Press F", "finished_criteria": "A frame is on the canvas"},
            {"step": 2, "instruction": "Rename it"},
            {"title": "No number"}
        ]},
        {"chapter": 2, "steps": []}
    ]"#;

    #[tokio::test]
    async fn parses_chapters_into_lessons() {
        let store = CourseFileStore::from_json(COURSE).unwrap();

        let steps = store.fetch_steps(1).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[&1].name, "Create a frame");
        assert_eq!(steps[&1].finish_criteria, "A frame is on the canvas");
        assert_eq!(steps[&2].name, "Step 2");
        assert_eq!(steps[&2].finish_criteria, "Step 2 completion criteria");

        assert!(store.fetch_steps(2).await.unwrap().is_empty());
        assert!(store.fetch_steps(3).await.unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            CourseFileStore::from_json("{not json"),
            Err(StoreError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(COURSE.as_bytes()).unwrap();

        let store = CourseFileStore::load(file.path()).await.unwrap();
        assert_eq!(store.fetch_steps(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let result = CourseFileStore::load(Path::new("/nonexistent/course.json")).await;
        assert!(matches!(result, Err(StoreError::Io(_))));
    }
}
