//! Lesson cache: fetch each lesson's steps at most once per process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::model::{LessonId, StepMap};
use crate::error::StoreError;
use crate::store::LessonStore;

/// Memoizes lesson steps per lesson id.
///
/// Each lesson gets its own `OnceCell`, so concurrent first requests for the
/// same lesson share a single fetch while other lessons load in parallel.
/// Empty results are cached; fetch errors are not.
pub struct LessonCache {
    store: Arc<dyn LessonStore>,
    lessons: Mutex<HashMap<LessonId, Arc<OnceCell<Arc<StepMap>>>>>,
}

impl LessonCache {
    pub fn new(store: Arc<dyn LessonStore>) -> Self {
        Self {
            store,
            lessons: Mutex::new(HashMap::new()),
        }
    }

    /// Get a lesson's steps, fetching from the store on first use.
    pub async fn get(&self, lesson_id: LessonId) -> Result<Arc<StepMap>, StoreError> {
        let cell = {
            let mut lessons = self.lessons.lock().await;
            Arc::clone(lessons.entry(lesson_id).or_default())
        };

        if let Some(steps) = cell.get() {
            debug!(lesson_id, "Lesson cache hit");
            return Ok(Arc::clone(steps));
        }

        let steps = cell
            .get_or_try_init(|| async {
                info!(lesson_id, "Loading lesson steps");
                let steps = self.store.fetch_steps(lesson_id).await?;
                info!(lesson_id, count = steps.len(), "Lesson steps cached");
                Ok::<_, StoreError>(Arc::new(steps))
            })
            .await?;

        Ok(Arc::clone(steps))
    }

    /// Whether a lesson has already been loaded.
    #[cfg(test)]
    pub(crate) async fn contains(&self, lesson_id: LessonId) -> bool {
        let lessons = self.lessons.lock().await;
        lessons
            .get(&lesson_id)
            .is_some_and(|cell| cell.initialized())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::lesson::model::Step;

    /// Store that counts fetches and fails the first `failures` calls.
    struct CountingStore {
        fetches: AtomicUsize,
        failures: usize,
        steps: StepMap,
    }

    impl CountingStore {
        fn new(steps: StepMap) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                failures: 0,
                steps,
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LessonStore for CountingStore {
        async fn fetch_steps(&self, _lesson_id: LessonId) -> Result<StepMap, StoreError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for concurrent first loads.
            tokio::time::sleep(Duration::from_millis(20)).await;
            if n < self.failures {
                return Err(StoreError::Connection("store offline".into()));
            }
            Ok(self.steps.clone())
        }
    }

    fn one_step() -> StepMap {
        let mut steps = StepMap::new();
        steps.insert(1, Step::new(1, Some("N".into()), Some("D".into()), Some("C".into())));
        steps
    }

    #[tokio::test]
    async fn second_get_uses_cache() {
        let store = Arc::new(CountingStore::new(one_step()));
        let cache = LessonCache::new(store.clone());

        let first = cache.get(7).await.unwrap();
        let second = cache.get(7).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.fetches(), 1);
        assert!(cache.contains(7).await);
    }

    #[tokio::test]
    async fn empty_lesson_is_cached() {
        let store = Arc::new(CountingStore::new(StepMap::new()));
        let cache = LessonCache::new(store.clone());

        assert!(cache.get(9).await.unwrap().is_empty());
        assert!(cache.get(9).await.unwrap().is_empty());
        assert_eq!(store.fetches(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_retried() {
        let store = Arc::new(CountingStore {
            failures: 1,
            ..CountingStore::new(one_step())
        });
        let cache = LessonCache::new(store.clone());

        assert!(cache.get(1).await.is_err());
        assert!(!cache.contains(1).await);

        let steps = cache.get(1).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(store.fetches(), 2);
    }

    #[tokio::test]
    async fn concurrent_first_loads_fetch_once() {
        let store = Arc::new(CountingStore::new(one_step()));
        let cache = Arc::new(LessonCache::new(store.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(3).await.map(|s| s.len()) })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        assert_eq!(store.fetches(), 1);
    }

    #[tokio::test]
    async fn different_lessons_fetch_separately() {
        let store = Arc::new(CountingStore::new(one_step()));
        let cache = LessonCache::new(store.clone());

        cache.get(1).await.unwrap();
        cache.get(2).await.unwrap();
        assert_eq!(store.fetches(), 2);
    }
}
