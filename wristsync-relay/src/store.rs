//! Exercise data file served by the phone role.

use std::path::Path;

use anyhow::Context;
use wristsync_core::wire::decode_exercises;
use wristsync_core::InMemoryExerciseRepository;

/// Load the JSON exercise list. A missing file serves an empty list.
pub fn load_exercises(path: &Path) -> anyhow::Result<InMemoryExerciseRepository> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "no exercise data file; serving empty list");
            return Ok(InMemoryExerciseRepository::default());
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let exercises =
        decode_exercises(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    let repo = InMemoryExerciseRepository::new(exercises);
    tracing::info!(count = repo.len(), path = %path.display(), "exercises loaded");
    Ok(repo)
}
