//! Tracks execution state for every known workflow.
//!
//! `StateManager` owns the state map and routes every mutation through
//! `WorkflowState`, awaiting one best-effort persist per mutation when a
//! store is configured. A broken store never interrupts orchestration:
//! persist failures are logged and swallowed, and previously persisted
//! workflows can be rehydrated after a restart.

use crate::error::StateError;
use crate::state::{Checkpoint, ExecutionSummary, WorkflowState};
use crate::status::{StepStatus, WorkflowStatus};
use crate::step::WorkflowContext;
use crate::store::StateStore;
use foreman_core::{CheckpointId, StepId, WorkflowId};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Execution-state registry with optional snapshot persistence.
#[derive(Default)]
pub struct StateManager {
    states: HashMap<WorkflowId, WorkflowState>,
    store: Option<Box<dyn StateStore>>,
}

impl StateManager {
    /// Creates an in-memory manager with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager that saves a snapshot after every mutation.
    #[must_use]
    pub fn with_store(store: impl StateStore + 'static) -> Self {
        Self {
            states: HashMap::new(),
            store: Some(Box::new(store)),
        }
    }

    /// Begins tracking a workflow with a fresh `pending` state.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowAlreadyTracked` if state already
    /// exists for the id.
    pub async fn create_workflow_state(
        &mut self,
        workflow_id: WorkflowId,
        workflow_name: &str,
    ) -> Result<&WorkflowState, StateError> {
        if self.states.contains_key(&workflow_id) {
            return Err(StateError::WorkflowAlreadyTracked { workflow_id });
        }
        self.states
            .insert(workflow_id, WorkflowState::new(workflow_id, workflow_name));
        self.persist(workflow_id).await;
        // Inserted above.
        Ok(&self.states[&workflow_id])
    }

    /// Returns the tracked state for a workflow, if any.
    #[must_use]
    pub fn state(&self, workflow_id: WorkflowId) -> Option<&WorkflowState> {
        self.states.get(&workflow_id)
    }

    /// Replaces the workflow's shared context.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowNotFound` if the workflow is not tracked.
    pub async fn set_context(
        &mut self,
        workflow_id: WorkflowId,
        context: WorkflowContext,
    ) -> Result<(), StateError> {
        self.state_mut(workflow_id)?.replace_context(context);
        self.persist(workflow_id).await;
        Ok(())
    }

    /// Lends the workflow's shared context out for a task execution.
    ///
    /// Context changes made through the borrow are captured by the next
    /// persisted mutation.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowNotFound` if the workflow is not tracked.
    pub fn context_mut(
        &mut self,
        workflow_id: WorkflowId,
    ) -> Result<&mut WorkflowContext, StateError> {
        Ok(&mut self.state_mut(workflow_id)?.context)
    }

    /// Applies a workflow-level status transition.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowNotFound` if the workflow is not tracked.
    pub async fn update_status(
        &mut self,
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<(), StateError> {
        self.state_mut(workflow_id)?.apply_status(status, error);
        self.persist(workflow_id).await;
        Ok(())
    }

    /// Applies a step-level status transition.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowNotFound` if the workflow is not tracked.
    pub async fn update_step_status(
        &mut self,
        workflow_id: WorkflowId,
        step_id: StepId,
        status: StepStatus,
        output: Option<JsonValue>,
        error: Option<String>,
    ) -> Result<(), StateError> {
        self.state_mut(workflow_id)?
            .apply_step_update(step_id, status, output, error);
        self.persist(workflow_id).await;
        Ok(())
    }

    /// Captures a checkpoint of the workflow's current progress.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowNotFound` if the workflow is not tracked.
    pub async fn create_checkpoint(
        &mut self,
        workflow_id: WorkflowId,
        context: Option<WorkflowContext>,
    ) -> Result<Checkpoint, StateError> {
        let checkpoint = self.state_mut(workflow_id)?.capture_checkpoint(context);
        self.persist(workflow_id).await;
        Ok(checkpoint)
    }

    /// Rolls a workflow back to one of its checkpoints.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowNotFound` if the workflow is not
    /// tracked, or `StateError::CheckpointNotFound` if the checkpoint id
    /// matches none of its checkpoints; in both cases nothing changes.
    pub async fn restore_checkpoint(
        &mut self,
        workflow_id: WorkflowId,
        checkpoint_id: CheckpointId,
    ) -> Result<(), StateError> {
        self.state_mut(workflow_id)?
            .restore_checkpoint(checkpoint_id)?;
        self.persist(workflow_id).await;
        Ok(())
    }

    /// Summarizes one workflow's progress, if tracked.
    #[must_use]
    pub fn execution_summary(&self, workflow_id: WorkflowId) -> Option<ExecutionSummary> {
        self.states.get(&workflow_id).map(WorkflowState::summary)
    }

    /// Summarizes every tracked workflow, oldest first.
    #[must_use]
    pub fn list_summaries(&self) -> Vec<ExecutionSummary> {
        let mut summaries: Vec<ExecutionSummary> =
            self.states.values().map(WorkflowState::summary).collect();
        summaries.sort_by_key(|s| (s.created_at, s.workflow_id.as_ulid()));
        summaries
    }

    /// Stops tracking a workflow and deletes its snapshot, best effort.
    ///
    /// Returns the removed state, or `None` if the workflow was not tracked.
    pub async fn discard(&mut self, workflow_id: WorkflowId) -> Option<WorkflowState> {
        let removed = self.states.remove(&workflow_id)?;
        if let Some(store) = &self.store
            && let Err(e) = store.delete(workflow_id).await
        {
            tracing::warn!(
                workflow_id = %workflow_id,
                error = %e,
                "failed to delete workflow snapshot"
            );
        }
        Some(removed)
    }

    /// Reloads one persisted workflow into the manager.
    ///
    /// Returns `Ok(true)` when a snapshot was loaded and `Ok(false)` when
    /// no store is configured or the store has no snapshot for the id.
    ///
    /// # Errors
    ///
    /// Returns `StateError::WorkflowAlreadyTracked` if the workflow already
    /// has live state (the live state wins over the snapshot), or
    /// `StateError::SnapshotLoadFailed` if the store fails to read the
    /// snapshot; an absent snapshot is `Ok(false)`, a broken store is an
    /// error.
    pub async fn hydrate(&mut self, workflow_id: WorkflowId) -> Result<bool, StateError> {
        if self.states.contains_key(&workflow_id) {
            return Err(StateError::WorkflowAlreadyTracked { workflow_id });
        }
        let Some(store) = &self.store else {
            return Ok(false);
        };
        match store.load(workflow_id).await {
            Ok(Some(state)) => {
                self.states.insert(workflow_id, state);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => Err(StateError::SnapshotLoadFailed {
                workflow_id,
                source: e,
            }),
        }
    }

    /// Reloads every persisted workflow that is not already tracked.
    ///
    /// Unreadable snapshots are logged and skipped. Returns the ids that
    /// were loaded.
    pub async fn hydrate_all(&mut self) -> Vec<WorkflowId> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let ids = match store.list().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "failed to list workflow snapshots");
                return Vec::new();
            }
        };

        let mut hydrated = Vec::new();
        for workflow_id in ids {
            if self.states.contains_key(&workflow_id) {
                continue;
            }
            match self.hydrate(workflow_id).await {
                Ok(true) => hydrated.push(workflow_id),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        workflow_id = %workflow_id,
                        error = %e,
                        "failed to hydrate workflow snapshot, skipping it"
                    );
                }
            }
        }
        hydrated
    }

    fn state_mut(&mut self, workflow_id: WorkflowId) -> Result<&mut WorkflowState, StateError> {
        self.states
            .get_mut(&workflow_id)
            .ok_or(StateError::WorkflowNotFound { workflow_id })
    }

    async fn persist(&self, workflow_id: WorkflowId) {
        let Some(store) = &self.store else { return };
        let Some(state) = self.states.get(&workflow_id) else {
            return;
        };
        if let Err(e) = store.save(state).await {
            tracing::warn!(
                workflow_id = %workflow_id,
                error = %e,
                "failed to save workflow snapshot, continuing without it"
            );
        }
    }
}
