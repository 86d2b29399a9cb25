//! Mutable execution state of a workflow.
//!
//! `WorkflowState` owns every transition rule: timestamp stamping,
//! idempotent progress lists, checkpoint capture and rollback, and the
//! progress summary. `StateManager` routes mutations here and handles
//! persistence; the engine never pokes state fields directly.

use crate::error::StateError;
use crate::status::{StepStatus, WorkflowStatus};
use crate::step::WorkflowContext;
use chrono::{DateTime, Utc};
use foreman_core::{CheckpointId, StepId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

/// Execution record of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The step this record belongs to.
    pub step_id: StepId,
    /// Last observed status.
    pub status: StepStatus,
    /// Output from the executor, when the step completed.
    #[serde(default)]
    pub output: Option<JsonValue>,
    /// Error message, when the step failed.
    #[serde(default)]
    pub error: Option<String>,
    /// When work on the step began.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step finished, one way or the other.
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds from start to finish, with millisecond precision.
    pub duration_seconds: Option<f64>,
}

impl StepResult {
    /// Creates a record for a step's first observed status.
    ///
    /// `started_at` is stamped at creation: the first observation of a
    /// step is when work on it began.
    #[must_use]
    pub fn new(step_id: StepId, status: StepStatus) -> Self {
        Self {
            step_id,
            status,
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            duration_seconds: None,
        }
    }
}

/// A restorable snapshot of workflow progress and context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Ordinal id within the owning workflow (`cp-0`, `cp-1`, ...).
    pub id: CheckpointId,
    /// The workflow this snapshot belongs to.
    pub workflow_id: WorkflowId,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Completed step ids at capture time.
    pub completed_steps: Vec<StepId>,
    /// The step that was running at capture time, if any.
    pub current_step: Option<StepId>,
    /// Deep copy of the context at capture time.
    pub context: WorkflowContext,
}

/// The mutable execution record of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// The workflow this state tracks.
    pub workflow_id: WorkflowId,
    /// Name copied from the definition, for summaries and logs.
    pub workflow_name: String,
    /// Workflow-level status.
    pub status: WorkflowStatus,
    /// The step currently running, if any.
    pub current_step: Option<StepId>,
    /// Step ids that completed, in completion order.
    pub completed_steps: Vec<StepId>,
    /// Step ids that failed, in failure order.
    pub failed_steps: Vec<StepId>,
    /// Per-step execution records, keyed by step id.
    pub step_results: HashMap<StepId, StepResult>,
    /// Snapshots taken so far, in creation order.
    pub checkpoints: Vec<Checkpoint>,
    /// Shared context the steps read and write.
    pub context: WorkflowContext,
    /// Workflow-level error message, when failed.
    pub error: Option<String>,
    /// When the state was created.
    pub created_at: DateTime<Utc>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
    /// When the workflow first entered `running`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the workflow last entered a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    /// Creates a fresh `pending` state with empty progress.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, workflow_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            workflow_name: workflow_name.into(),
            status: WorkflowStatus::Pending,
            current_step: None,
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            step_results: HashMap::new(),
            checkpoints: Vec::new(),
            context: WorkflowContext::new(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Applies a workflow-level status transition.
    ///
    /// The first transition into `running` stamps `started_at`; every
    /// transition into a terminal status stamps `completed_at`. An error
    /// message is recorded when provided and left alone otherwise.
    pub fn apply_status(&mut self, status: WorkflowStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        if status == WorkflowStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            self.completed_at = Some(now);
        }
        if let Some(message) = error {
            self.error = Some(message);
        }
        self.updated_at = now;
    }

    /// Applies a step-level status transition.
    ///
    /// Creates the step's result record on first reference. The provided
    /// output and error replace whatever the record held. Transitions into
    /// `complete` and `failed` stamp `completed_at`, compute the duration,
    /// and append to the respective progress list idempotently; a step
    /// that was the current step stops being it once it finishes.
    pub fn apply_step_update(
        &mut self,
        step_id: StepId,
        status: StepStatus,
        output: Option<JsonValue>,
        error: Option<String>,
    ) {
        let now = Utc::now();

        let result = self
            .step_results
            .entry(step_id)
            .or_insert_with(|| StepResult::new(step_id, status));
        result.status = status;
        result.output = output;
        result.error = error;
        if status == StepStatus::Running && result.started_at.is_none() {
            result.started_at = Some(now);
        }
        if matches!(status, StepStatus::Complete | StepStatus::Failed) {
            result.completed_at = Some(now);
            if let Some(started) = result.started_at {
                result.duration_seconds = Some(seconds_between(started, now));
            }
        }

        match status {
            StepStatus::Running => self.current_step = Some(step_id),
            StepStatus::Complete => {
                if !self.completed_steps.contains(&step_id) {
                    self.completed_steps.push(step_id);
                }
                if self.current_step == Some(step_id) {
                    self.current_step = None;
                }
            }
            StepStatus::Failed => {
                if !self.failed_steps.contains(&step_id) {
                    self.failed_steps.push(step_id);
                }
                if self.current_step == Some(step_id) {
                    self.current_step = None;
                }
            }
            StepStatus::Pending | StepStatus::Skipped => {}
        }

        self.updated_at = now;
    }

    /// Replaces the shared context wholesale.
    pub fn replace_context(&mut self, context: WorkflowContext) {
        self.context = context;
        self.updated_at = Utc::now();
    }

    /// Captures a restorable snapshot of progress and context.
    ///
    /// The context is deep-copied, so later mutations of the live state
    /// never show through. A caller-supplied context is captured in place
    /// of the live one.
    pub fn capture_checkpoint(&mut self, context: Option<WorkflowContext>) -> Checkpoint {
        let checkpoint = Checkpoint {
            id: CheckpointId::new(self.checkpoints.len() as u32),
            workflow_id: self.workflow_id,
            created_at: Utc::now(),
            completed_steps: self.completed_steps.clone(),
            current_step: self.current_step,
            context: context.unwrap_or_else(|| self.context.clone()),
        };
        self.checkpoints.push(checkpoint.clone());
        self.updated_at = checkpoint.created_at;
        checkpoint
    }

    /// Rolls the state back to a checkpoint.
    ///
    /// Progress, current step and context are reset to the checkpointed
    /// copies; step results are pruned to the checkpointed completed set;
    /// failed steps and the workflow error are cleared, so the restored
    /// state is derivable from the checkpoint alone. The status is forced
    /// back to `running` so execution can resume. Checkpoints taken after
    /// the restored one are kept.
    ///
    /// # Errors
    ///
    /// Returns `StateError::CheckpointNotFound` if the id matches none of
    /// this workflow's checkpoints; the state is left untouched.
    pub fn restore_checkpoint(&mut self, checkpoint_id: CheckpointId) -> Result<(), StateError> {
        let checkpoint = match self.checkpoints.iter().find(|c| c.id == checkpoint_id) {
            Some(checkpoint) => checkpoint.clone(),
            None => {
                return Err(StateError::CheckpointNotFound {
                    workflow_id: self.workflow_id,
                    checkpoint_id,
                });
            }
        };

        let keep: HashSet<StepId> = checkpoint.completed_steps.iter().copied().collect();
        self.step_results.retain(|id, _| keep.contains(id));
        self.completed_steps = checkpoint.completed_steps;
        self.current_step = checkpoint.current_step;
        self.context = checkpoint.context;
        self.failed_steps.clear();
        self.error = None;
        self.status = WorkflowStatus::Running;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Summarizes progress for the query surface.
    ///
    /// `total_steps` counts the steps observed so far (not the definition
    /// size, which the state does not know); while the workflow is
    /// unfinished the duration runs up to now.
    #[must_use]
    pub fn summary(&self) -> ExecutionSummary {
        let total_steps = self.step_results.len();
        let completed_count = self.completed_steps.len();
        let progress_percent = if total_steps == 0 {
            0.0
        } else {
            completed_count as f64 / total_steps as f64 * 100.0
        };
        let duration_seconds = self.started_at.map(|started| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            seconds_between(started, end)
        });

        ExecutionSummary {
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            total_steps,
            completed_count,
            failed_count: self.failed_steps.len(),
            progress_percent,
            duration_seconds,
            checkpoint_count: self.checkpoints.len(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Point-in-time progress summary of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub total_steps: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub progress_percent: f64,
    pub duration_seconds: Option<f64>,
    pub checkpoint_count: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Seconds between two instants, with millisecond precision.
pub(crate) fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_state() -> WorkflowState {
        WorkflowState::new(WorkflowId::new(), "test workflow")
    }

    #[test]
    fn new_state_is_pending_and_empty() {
        let state = create_state();
        assert_eq!(state.status, WorkflowStatus::Pending);
        assert!(state.current_step.is_none());
        assert!(state.completed_steps.is_empty());
        assert!(state.failed_steps.is_empty());
        assert!(state.step_results.is_empty());
        assert!(state.checkpoints.is_empty());
        assert!(state.started_at.is_none());
        assert!(state.completed_at.is_none());
        assert_eq!(state.created_at, state.updated_at);
    }

    #[test]
    fn first_running_transition_stamps_started_at_once() {
        let mut state = create_state();
        state.apply_status(WorkflowStatus::Running, None);
        let first_start = state.started_at.expect("started_at stamped");

        state.apply_status(WorkflowStatus::Paused, None);
        state.apply_status(WorkflowStatus::Running, None);
        assert_eq!(state.started_at, Some(first_start));
    }

    #[test]
    fn terminal_transition_stamps_completed_at() {
        let mut state = create_state();
        state.apply_status(WorkflowStatus::Running, None);
        assert!(state.completed_at.is_none());

        state.apply_status(WorkflowStatus::Failed, Some("step exploded".to_string()));
        assert!(state.completed_at.is_some());
        assert_eq!(state.error.as_deref(), Some("step exploded"));
    }

    #[test]
    fn missing_error_message_keeps_previous_value() {
        let mut state = create_state();
        state.apply_status(WorkflowStatus::Failed, Some("first failure".to_string()));
        state.apply_status(WorkflowStatus::Running, None);
        assert_eq!(state.error.as_deref(), Some("first failure"));
    }

    #[test]
    fn first_step_reference_creates_result_with_start_time() {
        let mut state = create_state();
        let step = StepId::new(0);
        state.apply_step_update(step, StepStatus::Running, None, None);

        let result = state.step_results.get(&step).expect("result created");
        assert_eq!(result.status, StepStatus::Running);
        assert!(result.started_at.is_some());
        assert!(result.completed_at.is_none());
        assert_eq!(state.current_step, Some(step));
    }

    #[test]
    fn completion_appends_and_clears_current_step() {
        let mut state = create_state();
        let step = StepId::new(0);
        state.apply_step_update(step, StepStatus::Running, None, None);
        state.apply_step_update(
            step,
            StepStatus::Complete,
            Some(serde_json::json!("done")),
            None,
        );

        assert_eq!(state.completed_steps, vec![step]);
        assert!(state.current_step.is_none());
        let result = &state.step_results[&step];
        assert_eq!(result.status, StepStatus::Complete);
        assert_eq!(result.output, Some(serde_json::json!("done")));
        assert!(result.completed_at.is_some());
        assert!(result.duration_seconds.is_some());
    }

    #[test]
    fn failure_appends_and_clears_current_step() {
        let mut state = create_state();
        let step = StepId::new(1);
        state.apply_step_update(step, StepStatus::Running, None, None);
        state.apply_step_update(
            step,
            StepStatus::Failed,
            None,
            Some("schema mismatch".to_string()),
        );

        assert_eq!(state.failed_steps, vec![step]);
        assert!(state.current_step.is_none());
        assert_eq!(
            state.step_results[&step].error.as_deref(),
            Some("schema mismatch")
        );
    }

    #[test]
    fn repeated_completion_is_idempotent() {
        let mut state = create_state();
        let step = StepId::new(0);
        state.apply_step_update(step, StepStatus::Complete, None, None);
        state.apply_step_update(step, StepStatus::Complete, None, None);

        assert_eq!(state.completed_steps, vec![step]);
        assert_eq!(state.summary().completed_count, 1);
    }

    #[test]
    fn completing_another_step_leaves_current_step_alone() {
        let mut state = create_state();
        let running = StepId::new(0);
        let other = StepId::new(1);
        state.apply_step_update(running, StepStatus::Running, None, None);
        state.apply_step_update(other, StepStatus::Complete, None, None);

        assert_eq!(state.current_step, Some(running));
    }

    #[test]
    fn checkpoints_are_numbered_in_creation_order() {
        let mut state = create_state();
        let first = state.capture_checkpoint(None);
        let second = state.capture_checkpoint(None);

        assert_eq!(first.id.to_string(), "cp-0");
        assert_eq!(second.id.to_string(), "cp-1");
        assert_eq!(state.checkpoints.len(), 2);
    }

    #[test]
    fn checkpoint_context_is_isolated_from_live_state() {
        let mut state = create_state();
        state
            .context
            .insert("phase".to_string(), serde_json::json!("design"));
        let checkpoint = state.capture_checkpoint(None);

        state
            .context
            .insert("phase".to_string(), serde_json::json!("implement"));
        state
            .context
            .insert("extra".to_string(), serde_json::json!(true));

        assert_eq!(
            state.checkpoints[0].context.get("phase"),
            Some(&serde_json::json!("design"))
        );
        assert!(!checkpoint.context.contains_key("extra"));
    }

    #[test]
    fn checkpoint_can_capture_a_supplied_context() {
        let mut state = create_state();
        state
            .context
            .insert("live".to_string(), serde_json::json!(1));

        let mut supplied = WorkflowContext::new();
        supplied.insert("supplied".to_string(), serde_json::json!(2));
        let checkpoint = state.capture_checkpoint(Some(supplied));

        assert!(checkpoint.context.contains_key("supplied"));
        assert!(!checkpoint.context.contains_key("live"));
    }

    #[test]
    fn restore_unknown_checkpoint_leaves_state_untouched() {
        let mut state = create_state();
        state.apply_step_update(StepId::new(0), StepStatus::Complete, None, None);
        let before = state.clone();

        let err = state.restore_checkpoint(CheckpointId::new(9)).unwrap_err();
        assert_eq!(
            err,
            StateError::CheckpointNotFound {
                workflow_id: state.workflow_id,
                checkpoint_id: CheckpointId::new(9),
            }
        );
        assert_eq!(state, before);
    }

    #[test]
    fn restore_rolls_back_progress_results_and_context() {
        let mut state = create_state();
        state.apply_status(WorkflowStatus::Running, None);
        let (a, b, c) = (StepId::new(0), StepId::new(1), StepId::new(2));

        state.apply_step_update(a, StepStatus::Complete, None, None);
        state.apply_step_update(b, StepStatus::Complete, None, None);
        state
            .context
            .insert("progress".to_string(), serde_json::json!(2));
        let checkpoint = state.capture_checkpoint(None);

        // Move past the checkpoint: one more completion, one failure.
        state.apply_step_update(c, StepStatus::Complete, None, None);
        state.apply_step_update(
            StepId::new(3),
            StepStatus::Failed,
            None,
            Some("late failure".to_string()),
        );
        state.apply_status(WorkflowStatus::Failed, Some("late failure".to_string()));
        state
            .context
            .insert("progress".to_string(), serde_json::json!(4));
        let later = state.capture_checkpoint(None);

        state
            .restore_checkpoint(checkpoint.id)
            .expect("checkpoint exists");

        assert_eq!(state.completed_steps, vec![a, b]);
        assert_eq!(state.current_step, checkpoint.current_step);
        assert_eq!(state.context.get("progress"), Some(&serde_json::json!(2)));
        assert_eq!(state.status, WorkflowStatus::Running);
        assert!(state.failed_steps.is_empty());
        assert!(state.error.is_none());
        // Results for steps beyond the checkpoint are gone.
        assert!(state.step_results.contains_key(&a));
        assert!(state.step_results.contains_key(&b));
        assert!(!state.step_results.contains_key(&c));
        assert!(!state.step_results.contains_key(&StepId::new(3)));
        // Later checkpoints survive a rollback.
        assert_eq!(state.checkpoints.len(), 2);
        assert_eq!(state.checkpoints[1].id, later.id);
    }

    #[test]
    fn summary_reports_counts_and_progress() {
        let mut state = create_state();
        let summary = state.summary();
        assert_eq!(summary.total_steps, 0);
        assert_eq!(summary.progress_percent, 0.0);
        assert!(summary.duration_seconds.is_none());

        state.apply_status(WorkflowStatus::Running, None);
        state.apply_step_update(StepId::new(0), StepStatus::Complete, None, None);
        state.apply_step_update(StepId::new(1), StepStatus::Running, None, None);

        let summary = state.summary();
        assert_eq!(summary.total_steps, 2);
        assert_eq!(summary.completed_count, 1);
        assert_eq!(summary.failed_count, 0);
        assert_eq!(summary.progress_percent, 50.0);
        assert!(summary.duration_seconds.is_some());
        assert_eq!(summary.checkpoint_count, 0);
    }

    #[test]
    fn state_serde_round_trip() {
        let mut state = create_state();
        state.apply_status(WorkflowStatus::Running, None);
        state.apply_step_update(
            StepId::new(0),
            StepStatus::Complete,
            Some(serde_json::json!({"rows": 3})),
            None,
        );
        state.capture_checkpoint(None);

        let json = serde_json::to_string(&state).expect("serialize");
        let restored: WorkflowState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, state);
    }
}
