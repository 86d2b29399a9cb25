//! Snapshot persistence for workflow state.
//!
//! One JSON document per workflow, replaced on every save. The state
//! manager saves after each mutation and swallows failures; direct store
//! calls surface their errors. Writes happen inline on the calling task.

use crate::error::StoreError;
use crate::state::WorkflowState;
use async_trait::async_trait;
use foreman_core::WorkflowId;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Trait for workflow snapshot storage.
///
/// Implementations must tolerate repeated saves for the same workflow and
/// treat deletion of a missing snapshot as a no-op.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Saves a snapshot, replacing any previous one for the workflow.
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError>;

    /// Loads the snapshot for a workflow, if one exists.
    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowState>, StoreError>;

    /// Deletes the snapshot for a workflow.
    async fn delete(&self, workflow_id: WorkflowId) -> Result<(), StoreError>;

    /// Lists the workflow ids with a stored snapshot, oldest id first.
    async fn list(&self) -> Result<Vec<WorkflowId>, StoreError>;
}

#[async_trait]
impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        (**self).save(state).await
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowState>, StoreError> {
        (**self).load(workflow_id).await
    }

    async fn delete(&self, workflow_id: WorkflowId) -> Result<(), StoreError> {
        (**self).delete(workflow_id).await
    }

    async fn list(&self) -> Result<Vec<WorkflowId>, StoreError> {
        (**self).list().await
    }
}

/// Filesystem store: one pretty-printed JSON document per workflow at
/// `<dir>/<workflow_id>.json`.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Opens the store, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            message: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    /// Returns the directory snapshots are written to.
    #[must_use]
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, workflow_id: WorkflowId) -> PathBuf {
        self.dir.join(format!("{workflow_id}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state).map_err(|e| StoreError::Serialization {
            message: e.to_string(),
        })?;
        std::fs::write(self.path_for(state.workflow_id), json).map_err(|e| StoreError::Io {
            message: e.to_string(),
        })
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowState>, StoreError> {
        let bytes = match std::fs::read(self.path_for(workflow_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    message: e.to_string(),
                });
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })
    }

    async fn delete(&self, workflow_id: WorkflowId) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(workflow_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io {
                message: e.to_string(),
            }),
        }
    }

    async fn list(&self) -> Result<Vec<WorkflowId>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StoreError::Io {
            message: e.to_string(),
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                message: e.to_string(),
            })?;
            let name = entry.file_name();
            let path: &std::path::Path = name.as_ref();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Foreign files in the directory are tolerated, not errors.
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Ok(id) = stem.parse::<WorkflowId>()
            {
                ids.push(id);
            }
        }
        ids.sort_by_key(|id| id.as_ulid());
        Ok(ids)
    }
}

/// In-memory store for tests and ephemeral orchestration.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<WorkflowId, WorkflowState>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &WorkflowState) -> Result<(), StoreError> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.workflow_id, state.clone());
        Ok(())
    }

    async fn load(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&workflow_id)
            .cloned())
    }

    async fn delete(&self, workflow_id: WorkflowId) -> Result<(), StoreError> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&workflow_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowId>, StoreError> {
        let mut ids: Vec<WorkflowId> = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort_by_key(|id| id.as_ulid());
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{StepStatus, WorkflowStatus};
    use foreman_core::StepId;

    fn create_state() -> WorkflowState {
        let mut state = WorkflowState::new(WorkflowId::new(), "persisted workflow");
        state.apply_status(WorkflowStatus::Running, None);
        state.apply_step_update(
            StepId::new(0),
            StepStatus::Complete,
            Some(serde_json::json!("schema ready")),
            None,
        );
        state.capture_checkpoint(None);
        state
    }

    #[tokio::test]
    async fn file_store_round_trips_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStateStore::new(dir.path()).expect("store opens");
        let state = create_state();

        store.save(&state).await.expect("save");
        let loaded = store
            .load(state.workflow_id)
            .await
            .expect("load")
            .expect("snapshot exists");
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn file_store_load_missing_returns_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStateStore::new(dir.path()).expect("store opens");

        let loaded = store.load(WorkflowId::new()).await.expect("load");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn file_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStateStore::new(dir.path()).expect("store opens");
        let state = create_state();

        store.save(&state).await.expect("save");
        store.delete(state.workflow_id).await.expect("delete");
        assert!(store.load(state.workflow_id).await.expect("load").is_none());
        // Deleting again is not an error.
        store.delete(state.workflow_id).await.expect("delete again");
    }

    #[tokio::test]
    async fn file_store_lists_snapshots_and_ignores_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStateStore::new(dir.path()).expect("store opens");

        let first = create_state();
        let second = create_state();
        store.save(&first).await.expect("save");
        store.save(&second).await.expect("save");
        std::fs::write(dir.path().join("README.txt"), b"not a snapshot").expect("write");
        std::fs::write(dir.path().join("notes.json"), b"{}").expect("write");

        let ids = store.list().await.expect("list");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.workflow_id));
        assert!(ids.contains(&second.workflow_id));
    }

    #[tokio::test]
    async fn persisted_document_uses_readable_ids_and_timestamps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStateStore::new(dir.path()).expect("store opens");
        let state = create_state();
        store.save(&state).await.expect("save");

        let path = dir.path().join(format!("{}.json", state.workflow_id));
        let raw = std::fs::read_to_string(path).expect("document exists");
        let doc: serde_json::Value = serde_json::from_str(&raw).expect("valid json");

        // The id field is the bare ULID; the prefixed form is for display
        // and filenames.
        assert_eq!(doc["workflow_id"], state.workflow_id.as_ulid().to_string());
        assert_eq!(doc["status"], "running");
        assert_eq!(doc["workflow_name"], "persisted workflow");
        assert_eq!(doc["step_results"]["step-0"]["status"], "complete");
        assert_eq!(doc["completed_steps"][0], "step-0");
        assert_eq!(doc["checkpoints"][0]["id"], "cp-0");
        assert!(doc["created_at"].as_str().expect("timestamp").contains('T'));
        assert!(doc["completed_at"].is_null());
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_state() {
        let store = InMemoryStateStore::new();
        let state = create_state();

        store.save(&state).await.expect("save");
        let loaded = store
            .load(state.workflow_id)
            .await
            .expect("load")
            .expect("snapshot exists");
        assert_eq!(loaded, state);

        store.delete(state.workflow_id).await.expect("delete");
        assert!(store.list().await.expect("list").is_empty());
    }
}
