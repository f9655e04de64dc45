//! Lesson data model: steps, step maps, and screenshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lesson identifier.
pub type LessonId = i64;

/// Position of a step within its lesson. Unique per lesson, starts at 1.
pub type StepOrder = u32;

/// Ordered mapping from step order to step.
pub type StepMap = BTreeMap<StepOrder, Step>;

/// One unit of instruction within a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub order: StepOrder,
    pub name: String,
    /// Instruction shown to the user.
    pub description: String,
    /// What "done" looks like, judged by the completion oracle.
    pub finish_criteria: String,
}

impl Step {
    /// Build a step, filling in a placeholder name or criterion when the
    /// source data leaves them empty.
    pub fn new(
        order: StepOrder,
        name: Option<String>,
        description: Option<String>,
        finish_criteria: Option<String>,
    ) -> Self {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Step {order}"));
        let finish_criteria = finish_criteria
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| format!("Step {order} completion criteria"));

        Self {
            order,
            name,
            description: description.unwrap_or_default(),
            finish_criteria,
        }
    }
}

/// A user-supplied screen capture, carried as base64 text end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    /// Base64-encoded image bytes.
    pub data: String,
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    "image/jpeg".into()
}

impl Screenshot {
    /// A JPEG screenshot from base64 text. A `data:` URL prefix is stripped
    /// and its media type kept.
    pub fn from_base64(data: impl Into<String>) -> Self {
        let data = data.into();
        if let Some(rest) = data.strip_prefix("data:") {
            if let Some((meta, payload)) = rest.split_once(',') {
                let media_type = meta.trim_end_matches(";base64");
                return Self {
                    data: payload.to_string(),
                    media_type: media_type.to_string(),
                };
            }
        }
        Self {
            data,
            media_type: default_media_type(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults_blank_fields() {
        let step = Step::new(3, None, Some("Open the menu".into()), Some("  ".into()));
        assert_eq!(step.name, "Step 3");
        assert_eq!(step.description, "Open the menu");
        assert_eq!(step.finish_criteria, "Step 3 completion criteria");
    }

    #[test]
    fn step_keeps_provided_fields() {
        let step = Step::new(
            1,
            Some("Frames".into()),
            Some("Draw a frame".into()),
            Some("A frame is visible".into()),
        );
        assert_eq!(step.name, "Frames");
        assert_eq!(step.finish_criteria, "A frame is visible");
    }

    #[test]
    fn screenshot_strips_data_url() {
        let shot = Screenshot::from_base64("data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(shot.media_type, "image/png");
        assert_eq!(shot.data, "iVBORw0KGgo=");
    }

    #[test]
    fn screenshot_defaults_to_jpeg() {
        let shot = Screenshot::from_base64("/9j/4AAQ");
        assert_eq!(shot.media_type, "image/jpeg");
        assert!(!shot.is_empty());
        assert!(Screenshot::from_base64(" ").is_empty());
    }
}
