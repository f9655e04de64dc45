//! libSQL backend: async `LessonStore` over a local SQLite file.
//!
//! Supports local file and in-memory databases. Steps live in the `step`
//! table keyed by `(lesson_id, step_order)`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::lesson::model::{LessonId, Step, StepMap, StepOrder};
use crate::store::migrations;
use crate::store::traits::LessonStore;

/// libSQL lesson store.
///
/// Holds a single connection reused for all operations.
pub struct LibSqlLessonStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLessonStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Lesson database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert or replace a step of a lesson.
    pub async fn insert_step(&self, lesson_id: LessonId, step: &Step) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO step (lesson_id, step_order, name, description, finish_criteria)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    lesson_id,
                    i64::from(step.order),
                    step.name.as_str(),
                    step.description.as_str(),
                    step.finish_criteria.as_str()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_step: {e}")))?;
        Ok(())
    }
}

/// Map a `step` row: `(step_order, name, description, finish_criteria)`.
fn row_to_step(row: &libsql::Row) -> Result<Step, StoreError> {
    let raw_order: i64 = row
        .get(0)
        .map_err(|e| StoreError::Parse(format!("step_order: {e}")))?;
    let order = StepOrder::try_from(raw_order)
        .ok()
        .filter(|o| *o > 0)
        .ok_or_else(|| StoreError::Parse(format!("step_order out of range: {raw_order}")))?;

    Ok(Step::new(
        order,
        row.get::<String>(1).ok(),
        row.get::<String>(2).ok(),
        row.get::<String>(3).ok(),
    ))
}

#[async_trait]
impl LessonStore for LibSqlLessonStore {
    async fn fetch_steps(&self, lesson_id: LessonId) -> Result<StepMap, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT step_order, name, description, finish_criteria
                 FROM step WHERE lesson_id = ?1 ORDER BY step_order ASC",
                params![lesson_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("fetch_steps: {e}")))?;

        let mut steps = StepMap::new();
        loop {
            let row = rows
                .next()
                .await
                .map_err(|e| StoreError::Query(format!("fetch_steps: {e}")))?;
            let Some(row) = row else { break };
            match row_to_step(&row) {
                Ok(step) => {
                    steps.insert(step.order, step);
                }
                Err(e) => warn!(lesson_id, error = %e, "Skipping step row"),
            }
        }

        info!(lesson_id, count = steps.len(), "Fetched lesson steps from database");
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> LibSqlLessonStore {
        LibSqlLessonStore::new_memory().await.unwrap()
    }

    fn step(order: StepOrder, criteria: Option<&str>) -> Step {
        Step::new(
            order,
            Some(format!("Step name {order}")),
            Some(format!("Do thing {order}")),
            criteria.map(String::from),
        )
    }

    #[tokio::test]
    async fn fetch_returns_steps_in_order() {
        let store = test_store().await;
        store.insert_step(1, &step(2, Some("Two done"))).await.unwrap();
        store.insert_step(1, &step(1, Some("One done"))).await.unwrap();
        store.insert_step(2, &step(1, Some("Other lesson"))).await.unwrap();

        let steps = store.fetch_steps(1).await.unwrap();
        let orders: Vec<_> = steps.keys().copied().collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(steps[&1].finish_criteria, "One done");
        assert_eq!(steps[&2].description, "Do thing 2");
    }

    #[tokio::test]
    async fn unknown_lesson_is_empty() {
        let store = test_store().await;
        assert!(store.fetch_steps(404).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn null_criteria_gets_placeholder() {
        let store = test_store().await;
        store
            .conn()
            .execute(
                "INSERT INTO step (lesson_id, step_order, name, description, finish_criteria)
                 VALUES (5, 1, 'Intro', 'Open the app', NULL)",
                (),
            )
            .await
            .unwrap();

        let steps = store.fetch_steps(5).await.unwrap();
        assert_eq!(steps[&1].finish_criteria, "Step 1 completion criteria");
    }

    #[tokio::test]
    async fn non_positive_step_order_is_skipped() {
        let store = test_store().await;
        store
            .conn()
            .execute(
                "INSERT INTO step (lesson_id, step_order, name, description) VALUES (6, 0, 'Bad', '')",
                (),
            )
            .await
            .unwrap();
        store.insert_step(6, &step(1, Some("ok"))).await.unwrap();

        let steps = store.fetch_steps(6).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps.contains_key(&1));
    }
}
