//! Error types for the workflow crate.
//!
//! Each layer owns its error enum:
//! - `ValidationError`: definition problems caught at build time
//! - `StateError`: state-manager bookkeeping failures
//! - `StoreError`: snapshot persistence failures
//! - `TaskError`: failures reported by task executors
//! - `ApprovalError`: failures inside approval handlers
//! - `StepError` / `EngineError`: how the engine classifies a failed step
//!   and a failed run; these are folded into the returned result, never
//!   thrown past the engine boundary.

use crate::step::AgentRole;
use foreman_core::{CheckpointId, GateId, WorkflowId};
use std::fmt;

/// Errors found while validating a workflow definition at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two steps share a name, making dependency references ambiguous.
    DuplicateStepName { name: String },
    /// A step is reachable from itself along `depends_on` edges.
    CyclicDependency { step: String },
    /// A `depends_on` entry names no declared step.
    UnknownDependency { step: String, dependency: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateStepName { name } => {
                write!(f, "duplicate step name '{name}'")
            }
            Self::CyclicDependency { step } => {
                write!(f, "dependency cycle involving step '{step}'")
            }
            Self::UnknownDependency { step, dependency } => {
                write!(f, "step '{step}' depends on unknown step '{dependency}'")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from state-manager bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// No state exists for the workflow id.
    WorkflowNotFound { workflow_id: WorkflowId },
    /// A state already exists for the workflow id.
    WorkflowAlreadyTracked { workflow_id: WorkflowId },
    /// The workflow has no checkpoint with the given id.
    CheckpointNotFound {
        workflow_id: WorkflowId,
        checkpoint_id: CheckpointId,
    },
    /// Reading the workflow's persisted snapshot failed.
    SnapshotLoadFailed {
        workflow_id: WorkflowId,
        source: StoreError,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not tracked: {workflow_id}")
            }
            Self::WorkflowAlreadyTracked { workflow_id } => {
                write!(f, "workflow already tracked: {workflow_id}")
            }
            Self::CheckpointNotFound {
                workflow_id,
                checkpoint_id,
            } => {
                write!(f, "checkpoint {checkpoint_id} not found for workflow {workflow_id}")
            }
            Self::SnapshotLoadFailed {
                workflow_id,
                source,
            } => {
                write!(f, "failed to load snapshot for workflow {workflow_id}: {source}")
            }
        }
    }
}

impl std::error::Error for StateError {}

/// Errors from snapshot persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Reading or writing the backing storage failed.
    Io { message: String },
    /// Encoding or decoding a snapshot failed.
    Serialization { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { message } => write!(f, "store i/o failed: {message}"),
            Self::Serialization { message } => {
                write!(f, "snapshot serialization failed: {message}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors reported by task executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task description or context was unusable.
    InvalidInput { message: String },
    /// The task ran and failed.
    Failed { message: String },
    /// An upstream service the executor depends on failed.
    ExternalService { service: String, message: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::Failed { message } => write!(f, "task failed: {message}"),
            Self::ExternalService { service, message } => {
                write!(f, "external service error ({service}): {message}")
            }
        }
    }
}

impl std::error::Error for TaskError {}

/// Errors from approval handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    /// The resolution channel was dropped without a decision.
    ResolutionClosed,
    /// The handler failed for its own reasons.
    Handler { message: String },
}

impl fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolutionClosed => write!(f, "approval resolution channel closed"),
            Self::Handler { message } => write!(f, "approval handler failed: {message}"),
        }
    }
}

impl std::error::Error for ApprovalError {}

/// Why a single dispatched step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// No executor is registered for the step's role.
    ExecutorNotRegistered { role: AgentRole },
    /// The executor reported a failure.
    Task(TaskError),
    /// The step ran past its time limit.
    TimedOut { limit_seconds: u64 },
    /// The approval gate was rejected.
    GateRejected { reason: String },
    /// The approval gate expired and auto-approval was off.
    GateTimedOut { hours: u32 },
    /// The step references a gate the definition does not carry.
    UnknownGate { gate: GateId },
    /// The step kind has no execution semantics.
    UnsupportedKind { kind: &'static str },
    /// The approval handler itself failed.
    Approval(ApprovalError),
    /// State bookkeeping failed while the step was in flight.
    State(StateError),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutorNotRegistered { role } => {
                write!(f, "no executor registered for role '{role}'")
            }
            Self::Task(e) => write!(f, "task execution failed: {e}"),
            Self::TimedOut { limit_seconds } => {
                write!(f, "step exceeded its {limit_seconds}s time limit")
            }
            Self::GateRejected { reason } => write!(f, "approval rejected: {reason}"),
            Self::GateTimedOut { hours } => {
                write!(f, "approval gate timed out after {hours}h")
            }
            Self::UnknownGate { gate } => {
                write!(f, "step references unknown gate {gate}")
            }
            Self::UnsupportedKind { kind } => {
                write!(f, "step kind '{kind}' is not executable")
            }
            Self::Approval(e) => write!(f, "approval handler error: {e}"),
            Self::State(e) => write!(f, "state error during step: {e}"),
        }
    }
}

impl std::error::Error for StepError {}

impl From<TaskError> for StepError {
    fn from(e: TaskError) -> Self {
        Self::Task(e)
    }
}

impl From<ApprovalError> for StepError {
    fn from(e: ApprovalError) -> Self {
        Self::Approval(e)
    }
}

impl From<StateError> for StepError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

/// Why a workflow run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// State bookkeeping failed before or during the run.
    State(StateError),
    /// No unexecuted step has its dependencies satisfied.
    Deadlock { remaining: Vec<String> },
    /// A step failed; the run stops at the first one.
    Step { step: String, source: StepError },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(e) => write!(f, "state error: {e}"),
            Self::Deadlock { remaining } => {
                write!(f, "no runnable step; remaining: {}", remaining.join(", "))
            }
            Self::Step { step, source } => {
                write!(f, "step '{step}' failed: {source}")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::CyclicDependency {
            step: "design".to_string(),
        };
        assert!(err.to_string().contains("cycle"));
        assert!(err.to_string().contains("design"));

        let err = ValidationError::UnknownDependency {
            step: "implement".to_string(),
            dependency: "desing".to_string(),
        };
        assert!(err.to_string().contains("implement"));
        assert!(err.to_string().contains("desing"));
    }

    #[test]
    fn state_error_display() {
        let workflow_id = WorkflowId::new();
        let err = StateError::CheckpointNotFound {
            workflow_id,
            checkpoint_id: CheckpointId::new(3),
        };
        assert!(err.to_string().contains("cp-3"));
        assert!(err.to_string().contains(&workflow_id.to_string()));
    }

    #[test]
    fn snapshot_load_failure_wraps_the_store_error() {
        let workflow_id = WorkflowId::new();
        let err = StateError::SnapshotLoadFailed {
            workflow_id,
            source: StoreError::Serialization {
                message: "truncated document".to_string(),
            },
        };
        let text = err.to_string();
        assert!(text.contains(&workflow_id.to_string()));
        assert!(text.contains("truncated document"));
    }

    #[test]
    fn unsupported_kind_names_the_kind() {
        let err = StepError::UnsupportedKind {
            kind: "parallel_group",
        };
        let text = err.to_string();
        assert!(text.contains("parallel_group"));
        assert!(text.contains("not executable"));
    }

    #[test]
    fn step_error_preserves_task_message() {
        let err = StepError::from(TaskError::Failed {
            message: "schema mismatch".to_string(),
        });
        assert!(err.to_string().contains("schema mismatch"));
    }

    #[test]
    fn engine_error_deadlock_lists_remaining_steps() {
        let err = EngineError::Deadlock {
            remaining: vec!["design".to_string(), "implement".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("design"));
        assert!(text.contains("implement"));
    }

    #[test]
    fn engine_error_step_wraps_step_name_and_cause() {
        let err = EngineError::Step {
            step: "unit tests".to_string(),
            source: StepError::TimedOut { limit_seconds: 300 },
        };
        let text = err.to_string();
        assert!(text.contains("unit tests"));
        assert!(text.contains("300"));
    }

    #[test]
    fn executor_not_registered_names_role() {
        let err = StepError::ExecutorNotRegistered {
            role: AgentRole::Qa,
        };
        assert!(err.to_string().contains("qa"));
    }
}
