//! Checkpoint storage for projections.
//!
//! A checkpoint is the complete serialized state of a projection, keyed by
//! the projection's formatted name. Saving replaces the previous snapshot
//! wholesale.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::CheckpointError;

/// Persists projection snapshots.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the snapshot saved under `name`.
    ///
    /// Returns `None` if nothing has been saved yet.
    async fn load(&self, name: &str) -> Result<Option<String>, CheckpointError>;

    /// Save `snapshot` under `name`, replacing any previous snapshot.
    ///
    /// Either the whole snapshot is stored or the previous one is left intact.
    async fn save(&self, name: &str, snapshot: &str) -> Result<(), CheckpointError>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self, name: &str) -> Result<Option<String>, CheckpointError> {
        (**self).load(name).await
    }

    async fn save(&self, name: &str, snapshot: &str) -> Result<(), CheckpointError> {
        (**self).save(name, snapshot).await
    }
}

/// One `<name>.json` file per projection in a directory.
///
/// Writes go to a temporary sibling file which is then renamed over the
/// checkpoint, so a crash mid-write never leaves a truncated snapshot.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    directory: PathBuf,
}

impl FileCheckpointStore {
    /// Store checkpoints under `directory`, creating it on first save.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory holding the checkpoint files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the checkpoint file for `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.json"))
    }

    fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, name: &str) -> Result<Option<String>, CheckpointError> {
        let path = self.path_for(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(Self::io_error(&path, error)),
        }
    }

    async fn save(&self, name: &str, snapshot: &str) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|error| Self::io_error(&self.directory, error))?;

        let path = self.path_for(name);
        let staging = self.directory.join(format!("{name}.json.tmp"));
        tokio::fs::write(&staging, snapshot)
            .await
            .map_err(|error| Self::io_error(&staging, error))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|error| Self::io_error(&path, error))?;

        debug!(path = %path.display(), bytes = snapshot.len(), "checkpoint written");
        Ok(())
    }
}

/// In-memory checkpoint store for testing.
///
/// Keeps every snapshot ever saved so tests can assert on checkpoint timing,
/// and can be told to fail saves.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: Mutex<MemoryCheckpoints>,
}

#[derive(Debug, Default)]
struct MemoryCheckpoints {
    latest: HashMap<String, String>,
    history: Vec<(String, String)>,
    failing_saves: u32,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a snapshot as if it had been saved by an earlier run.
    pub fn insert(&self, name: impl Into<String>, snapshot: impl Into<String>) {
        let _ = self.inner.lock().latest.insert(name.into(), snapshot.into());
    }

    /// Every snapshot saved under `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<String> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|(saved_name, _)| saved_name == name)
            .map(|(_, snapshot)| snapshot.clone())
            .collect()
    }

    /// Total number of successful saves.
    pub fn save_count(&self) -> usize {
        self.inner.lock().history.len()
    }

    /// Make the next `count` saves fail.
    pub fn fail_next_saves(&self, count: u32) {
        self.inner.lock().failing_saves = count;
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, name: &str) -> Result<Option<String>, CheckpointError> {
        Ok(self.inner.lock().latest.get(name).cloned())
    }

    async fn save(&self, name: &str, snapshot: &str) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock();
        if inner.failing_saves > 0 {
            inner.failing_saves -= 1;
            return Err(CheckpointError::Unavailable(format!(
                "injected failure saving {name}"
            )));
        }
        let _ = inner.latest.insert(name.to_string(), snapshot.to_string());
        inner.history.push((name.to_string(), snapshot.to_string()));
        Ok(())
    }
}
