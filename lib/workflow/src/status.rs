//! Workflow and step status state machines.
//!
//! A workflow moves `pending -> running -> (complete | failed | cancelled)`,
//! with `paused` and `waiting_approval` as resumable detours. A step moves
//! `pending -> running -> (complete | failed | skipped)`. The state manager
//! stamps timestamps on the transitions; these enums only answer questions
//! about the states themselves.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a whole workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not yet started.
    Pending,
    /// At least one step has been dispatched.
    Running,
    /// Suspended by the caller.
    Paused,
    /// Parked on an approval gate.
    WaitingApproval,
    /// Every step finished successfully.
    Complete,
    /// A step failed or the engine gave up.
    Failed,
    /// Abandoned by the caller.
    Cancelled,
}

impl WorkflowStatus {
    /// Returns true if the workflow can never leave this status on its own.
    ///
    /// Terminal statuses stamp `completed_at`; `restore_checkpoint` is the
    /// only way back out of one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the engine is actively working the workflow.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::WaitingApproval)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::WaitingApproval => "waiting_approval",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Declared but not yet dispatched.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// Deliberately not executed.
    Skipped,
}

impl StepStatus {
    /// Returns true if the step has finished, one way or another.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}
