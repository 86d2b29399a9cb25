//! Immutable workflow definitions.
//!
//! A definition is produced by `WorkflowBuilder::build` and never mutated
//! by execution. Step declaration order is significant: the engine scans it
//! when picking the next ready step.

use crate::error::ValidationError;
use crate::step::{ApprovalGate, WorkflowStep};
use chrono::{DateTime, Utc};
use foreman_core::{GateId, StepId, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Declared execution style of a workflow.
///
/// Only sequential semantics are implemented; the engine logs the
/// degradation when it runs one of the other patterns. The declared value
/// is kept so definitions round-trip faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPattern {
    /// One step at a time, in dependency order.
    #[default]
    Sequential,
    /// Declared parallel branches.
    Parallel,
    /// Agents argue toward a conclusion.
    Debate,
    /// Plan adjusted between steps.
    Adaptive,
}

impl ExecutionPattern {
    /// Returns the lowercase name matching the serialized form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Debate => "debate",
            Self::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for ExecutionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable, validated description of a multi-step workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique id, generated at build time.
    pub id: WorkflowId,
    /// Human-readable workflow name.
    pub name: String,
    /// What the workflow is for.
    #[serde(default)]
    pub description: String,
    /// Declared execution style.
    #[serde(default)]
    pub pattern: ExecutionPattern,
    /// Steps in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// Gate records referenced by approval-gate steps.
    #[serde(default)]
    pub approval_gates: Vec<ApprovalGate>,
    /// When the definition was built.
    pub created_at: DateTime<Utc>,
    /// `depends_on` names resolved to step ids. Not serialized; rebuilt via
    /// `rebuild_dependency_index` after deserialization.
    #[serde(skip)]
    pub(crate) dependency_index: HashMap<StepId, Vec<StepId>>,
}

impl WorkflowDefinition {
    /// Looks up a step by its id.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Looks up a step by its caller-supplied name.
    #[must_use]
    pub fn step_by_name(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Looks up an approval gate record by its id.
    #[must_use]
    pub fn gate(&self, id: GateId) -> Option<&ApprovalGate> {
        self.approval_gates.iter().find(|g| g.id == id)
    }

    /// Resolved dependencies of a step, in the order they were declared.
    ///
    /// Empty for steps with no dependencies and for ids the definition does
    /// not know (a deserialized definition whose index was never rebuilt
    /// reports every step as dependency-free; call
    /// `rebuild_dependency_index` first).
    #[must_use]
    pub fn dependencies(&self, id: StepId) -> &[StepId] {
        self.dependency_index
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Recomputes the name-to-id dependency resolution.
    ///
    /// The index is skipped during serialization; call this after
    /// deserializing a definition. Applies the same validation as
    /// `WorkflowBuilder::build`, so a hand-edited document that no longer
    /// resolves is rejected here.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if step names are not unique, the
    /// dependency graph contains a cycle, or a dependency names no step.
    pub fn rebuild_dependency_index(&mut self) -> Result<(), ValidationError> {
        self.dependency_index = crate::builder::validate(&self.steps)?;
        Ok(())
    }
}
