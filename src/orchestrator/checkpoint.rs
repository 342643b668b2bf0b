//! Durable per-thread state snapshots.
//!
//! Every state transition is checkpointed so a thread can resume after
//! a crash exactly where it stopped, including mid-approval. Snapshots
//! are complete (never deltas): restoring means reading the latest
//! sequence number for the thread, nothing else.
//!
//! The file layout is `<root>/<thread_id>/<seq>.json`, one file per
//! snapshot, written atomically via a temp file and rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::state::AgentState;

/// Errors from the checkpoint store.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Checkpoint '{path}' is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("No checkpoint found for thread '{thread_id}'")]
    NotFound { thread_id: String },

    #[error("Thread id '{thread_id}' is not a valid checkpoint key")]
    InvalidThreadId { thread_id: String },
}

/// One durable snapshot of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Thread this snapshot belongs to.
    pub thread_id: String,
    /// Monotonic sequence number within the thread, starting at 1.
    pub sequence: u64,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// The complete state at that point.
    pub state: AgentState,
}

/// Listing entry for a thread's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Number of turns in the snapshot, for display.
    pub turn_count: usize,
}

/// Persistence seam for thread state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a new snapshot and return its sequence number.
    async fn save(&self, state: &AgentState) -> Result<u64, CheckpointError>;

    /// Load the latest snapshot for a thread. Missing thread is
    /// [`CheckpointError::NotFound`]; an unreadable snapshot is
    /// [`CheckpointError::Corrupt`], never silently skipped.
    async fn load(&self, thread_id: &str) -> Result<Checkpoint, CheckpointError>;

    /// All thread ids with at least one snapshot.
    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError>;

    /// Snapshot summaries for a thread, oldest first. With a limit,
    /// only the most recent snapshots are returned.
    async fn history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointSummary>, CheckpointError>;

    /// Remove a thread and all its snapshots.
    async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError>;
}

/// File-backed checkpoint store.
pub struct FileCheckpointStore {
    root: PathBuf,
    /// Next sequence per thread, learned lazily from the directory.
    sequences: Mutex<HashMap<String, u64>>,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root`. The directory is created on
    /// first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Thread ids double as directory names, so path separators and
    /// traversal components are rejected up front.
    fn thread_dir(&self, thread_id: &str) -> Result<PathBuf, CheckpointError> {
        let valid = !thread_id.is_empty()
            && thread_id != "."
            && thread_id != ".."
            && !thread_id.contains(['/', '\\', '\0']);
        if !valid {
            return Err(CheckpointError::InvalidThreadId {
                thread_id: thread_id.to_string(),
            });
        }
        Ok(self.root.join(thread_id))
    }

    fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
        dir.join(format!("{sequence:010}.json"))
    }

    async fn latest_sequence(dir: &Path) -> Result<Option<u64>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut latest = None;
        while let Some(entry) = entries.next_entry().await.map_err(|source| {
            CheckpointError::Io {
                path: dir.to_path_buf(),
                source,
            }
        })? {
            if let Some(seq) = parse_sequence(&entry.path()) {
                latest = latest.max(Some(seq));
            }
        }
        Ok(latest)
    }

    async fn read_snapshot(path: &Path) -> Result<Checkpoint, CheckpointError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_slice(&raw).map_err(|source| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn parse_sequence(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &AgentState) -> Result<u64, CheckpointError> {
        let dir = self.thread_dir(&state.thread_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CheckpointError::Io {
                path: dir.clone(),
                source,
            })?;

        let mut sequences = self.sequences.lock().await;
        let next = match sequences.get(&state.thread_id) {
            Some(&n) => n,
            None => Self::latest_sequence(&dir).await?.unwrap_or(0) + 1,
        };

        let checkpoint = Checkpoint {
            thread_id: state.thread_id.clone(),
            sequence: next,
            created_at: Utc::now(),
            state: state.clone(),
        };
        let encoded = serde_json::to_vec_pretty(&checkpoint).map_err(|source| {
            CheckpointError::Corrupt {
                path: Self::snapshot_path(&dir, next),
                source,
            }
        })?;

        // Write-then-rename so a crash never leaves a half-written
        // snapshot behind under a valid name.
        let final_path = Self::snapshot_path(&dir, next);
        let temp_path = dir.join(format!(".{next:010}.json.tmp"));
        tokio::fs::write(&temp_path, &encoded)
            .await
            .map_err(|source| CheckpointError::Io {
                path: temp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|source| CheckpointError::Io {
                path: final_path.clone(),
                source,
            })?;

        sequences.insert(state.thread_id.clone(), next + 1);
        tracing::debug!(
            thread_id = %state.thread_id,
            sequence = next,
            "Checkpoint saved"
        );
        Ok(next)
    }

    async fn load(&self, thread_id: &str) -> Result<Checkpoint, CheckpointError> {
        let dir = self.thread_dir(thread_id)?;
        let latest = Self::latest_sequence(&dir)
            .await?
            .ok_or_else(|| CheckpointError::NotFound {
                thread_id: thread_id.to_string(),
            })?;
        Self::read_snapshot(&Self::snapshot_path(&dir, latest)).await
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut threads = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|source| {
            CheckpointError::Io {
                path: self.root.clone(),
                source,
            }
        })? {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|source| CheckpointError::Io {
                    path: entry.path(),
                    source,
                })?
                .is_dir();
            if is_dir && let Some(name) = entry.file_name().to_str() {
                threads.push(name.to_string());
            }
        }
        threads.sort();
        Ok(threads)
    }

    async fn history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let dir = self.thread_dir(thread_id)?;
        let mut sequences = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound {
                    thread_id: thread_id.to_string(),
                });
            }
            Err(source) => return Err(CheckpointError::Io { path: dir, source }),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|source| {
            CheckpointError::Io {
                path: dir.clone(),
                source,
            }
        })? {
            if let Some(seq) = parse_sequence(&entry.path()) {
                sequences.push(seq);
            }
        }
        sequences.sort_unstable();
        if let Some(limit) = limit
            && sequences.len() > limit
        {
            sequences.drain(..sequences.len() - limit);
        }

        let mut history = Vec::with_capacity(sequences.len());
        for seq in sequences {
            let checkpoint = Self::read_snapshot(&Self::snapshot_path(&dir, seq)).await?;
            history.push(CheckpointSummary {
                sequence: checkpoint.sequence,
                created_at: checkpoint.created_at,
                turn_count: checkpoint.state.turns.len(),
            });
        }
        Ok(history)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), CheckpointError> {
        let dir = self.thread_dir(thread_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(CheckpointError::Io { path: dir, source }),
        }
        self.sequences.lock().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, FileCheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (_dir, store) = store();
        let state = AgentState::new("thread-a").with_user_input("check disk");

        let seq = store.save(&state).await.unwrap();
        assert_eq!(seq, 1);

        let restored = store.load("thread-a").await.unwrap();
        assert_eq!(restored.sequence, 1);
        assert_eq!(restored.state, state);
    }

    #[tokio::test]
    async fn test_load_returns_latest_snapshot() {
        let (_dir, store) = store();
        let first = AgentState::new("thread-a").with_user_input("one");
        let second = first.with_user_input("two");

        store.save(&first).await.unwrap();
        let seq = store.save(&second).await.unwrap();
        assert_eq!(seq, 2);

        let restored = store.load("thread-a").await.unwrap();
        assert_eq!(restored.sequence, 2);
        assert_eq!(restored.state, second);
    }

    #[tokio::test]
    async fn test_threads_sequence_independently() {
        let (_dir, store) = store();
        store.save(&AgentState::new("a")).await.unwrap();
        store.save(&AgentState::new("a")).await.unwrap();
        let seq_b = store.save(&AgentState::new("b")).await.unwrap();

        assert_eq!(seq_b, 1);
        assert_eq!(store.load("a").await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_sequence_survives_store_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        store.save(&AgentState::new("a")).await.unwrap();
        store.save(&AgentState::new("a")).await.unwrap();

        // A fresh store over the same directory continues the count.
        let store = FileCheckpointStore::new(dir.path());
        let seq = store.save(&AgentState::new("a")).await.unwrap();
        assert_eq!(seq, 3);
    }

    #[tokio::test]
    async fn test_missing_thread_is_not_found() {
        let (_dir, store) = store();
        let err = store.load("ghost").await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_explicit() {
        let (dir, store) = store();
        store.save(&AgentState::new("a")).await.unwrap();

        let path = dir.path().join("a").join("0000000001.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = store.load("a").await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_invalid_thread_id_rejected() {
        let (_dir, store) = store();
        let err = store.save(&AgentState::new("../escape")).await.unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidThreadId { .. }));
    }

    #[tokio::test]
    async fn test_list_and_history_and_delete() {
        let (_dir, store) = store();
        let state = AgentState::new("a").with_user_input("task");
        store.save(&state).await.unwrap();
        store.save(&state.with_user_input("more")).await.unwrap();
        store.save(&AgentState::new("b")).await.unwrap();

        assert_eq!(store.list_threads().await.unwrap(), vec!["a", "b"]);

        let history = store.history("a", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sequence, 1);
        assert_eq!(history[1].sequence, 2);
        assert_eq!(history[1].turn_count, 2);

        let recent = store.history("a", Some(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].sequence, 2);

        store.delete_thread("a").await.unwrap();
        assert_eq!(store.list_threads().await.unwrap(), vec!["b"]);
        assert!(matches!(
            store.load("a").await.unwrap_err(),
            CheckpointError::NotFound { .. }
        ));
    }
}
