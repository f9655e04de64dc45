//! Lessons, steps, and the per-process lesson cache.

pub mod cache;
pub mod model;

pub use cache::LessonCache;
pub use model::{LessonId, Screenshot, Step, StepMap, StepOrder};
