//! Exercise data access contract and an in-memory implementation.

use std::cmp::Ordering;
use std::convert::Infallible;

use crate::entity::{ExerciseEntity, Locale};

/// Read access to the serving device's exercises. Persistence stays behind this trait.
pub trait ExerciseRepository: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Most recently used first.
    fn recent_exercises(
        &self,
        limit: usize,
        offset: usize,
        locale: &Locale,
    ) -> Result<Vec<ExerciseEntity>, Self::Error>;

    /// Name search; `None` or a blank query lists everything.
    fn search_exercises(
        &self,
        query: Option<&str>,
        locale: &Locale,
    ) -> Result<Vec<ExerciseEntity>, Self::Error>;
}

/// Exercises held in memory, e.g. loaded once from a data file.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExerciseRepository {
    exercises: Vec<ExerciseEntity>,
}

impl InMemoryExerciseRepository {
    pub fn new(exercises: Vec<ExerciseEntity>) -> Self {
        Self { exercises }
    }

    pub fn len(&self) -> usize {
        self.exercises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exercises.is_empty()
    }
}

/// Newest `last_used_at` first; entries never used go last; ties by name.
fn by_recency(a: &ExerciseEntity, b: &ExerciseEntity) -> Ordering {
    match (a.last_used_at, b.last_used_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.name.cmp(&b.name))
}

impl ExerciseRepository for InMemoryExerciseRepository {
    type Error = Infallible;

    fn recent_exercises(
        &self,
        limit: usize,
        offset: usize,
        _locale: &Locale,
    ) -> Result<Vec<ExerciseEntity>, Infallible> {
        let mut sorted: Vec<&ExerciseEntity> = self.exercises.iter().collect();
        sorted.sort_by(|a, b| by_recency(a, b));
        Ok(sorted
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn search_exercises(
        &self,
        query: Option<&str>,
        _locale: &Locale,
    ) -> Result<Vec<ExerciseEntity>, Infallible> {
        let needle = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);
        let mut hits: Vec<ExerciseEntity> = self
            .exercises
            .iter()
            .filter(|e| match &needle {
                Some(n) => e.name.to_lowercase().contains(n.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hits)
    }
}
