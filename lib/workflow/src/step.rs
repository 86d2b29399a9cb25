//! Step and gate building blocks of a workflow definition.
//!
//! Steps are addressed to agent roles rather than concrete agents; the
//! engine resolves a role to an executor at dispatch time. Approval gates
//! are represented as a gate record plus a step that references it, so a
//! gate occupies a position in the step order like any other unit of work.

use foreman_core::{GateId, StepId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Default per-step execution time limit, in seconds.
pub const DEFAULT_STEP_TIMEOUT_SECONDS: u64 = 300;

/// Default retry allowance recorded on a step.
pub const DEFAULT_STEP_RETRY_LIMIT: u32 = 3;

/// Default time an approval gate waits for a decision, in hours.
pub const DEFAULT_GATE_TIMEOUT_HOURS: u32 = 24;

/// Shared key-value context flowing through a workflow.
///
/// Seeded by the caller at execution start, lent mutably to each executor
/// in turn, and captured (by deep copy) into checkpoints.
pub type WorkflowContext = HashMap<String, JsonValue>;

/// The category of agent a step is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Schema design, queries, migrations.
    Database,
    /// Model-backed reasoning and generation.
    Ai,
    /// Service endpoints and integrations.
    Api,
    /// Review, testing, verification.
    Qa,
    /// Coordination of other agents.
    Orchestrator,
}

impl AgentRole {
    /// Returns the lowercase name used in logs and registry lookups.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Ai => "ai",
            Self::Api => "api",
            Self::Qa => "qa",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a step does when the engine dispatches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Hand `task` to the executor registered for `role`.
    AgentTask { role: AgentRole, task: String },
    /// Park the workflow until the referenced gate is resolved.
    ApprovalGate { gate: GateId },
    /// Declared grouping marker; not executable.
    ParallelGroup,
    /// Declared branching marker; not executable.
    Conditional,
}

impl StepKind {
    /// Short name matching the serialized tag, for logs and errors.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::AgentTask { .. } => "agent_task",
            Self::ApprovalGate { .. } => "approval_gate",
            Self::ParallelGroup => "parallel_group",
            Self::Conditional => "conditional",
        }
    }
}

fn default_step_timeout() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECONDS
}

fn default_step_retry_limit() -> u32 {
    DEFAULT_STEP_RETRY_LIMIT
}

/// A single unit of work within a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Synthetic id assigned by the builder, monotonic in declaration order.
    pub id: StepId,
    /// Caller-supplied name. Unique within a definition; the key other
    /// steps reference in `depends_on`.
    pub name: String,
    /// What the step does.
    pub kind: StepKind,
    /// Names of the steps that must complete before this one may start.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Execution time limit. Enforced by the engine unless disabled in its
    /// config; executors may also consult it.
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
    /// Retry allowance for the executor to honor. The engine never
    /// re-dispatches a failed step.
    #[serde(default = "default_step_retry_limit")]
    pub retry_limit: u32,
    /// Opaque caller metadata. `add_parallel_steps` records the group label
    /// under `"parallel_group"`.
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

impl WorkflowStep {
    /// Returns the parallel-group label, if this step was declared through
    /// `add_parallel_steps`.
    #[must_use]
    pub fn parallel_group(&self) -> Option<&str> {
        self.metadata.get("parallel_group").and_then(JsonValue::as_str)
    }
}

fn default_gate_timeout() -> u32 {
    DEFAULT_GATE_TIMEOUT_HOURS
}

/// A decision point a workflow suspends on until somebody resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGate {
    /// Synthetic id assigned by the builder, monotonic in creation order.
    pub id: GateId,
    /// Caller-supplied name.
    pub name: String,
    /// What is being approved.
    pub description: String,
    /// How long the engine waits for a decision before applying the
    /// timeout policy.
    #[serde(default = "default_gate_timeout")]
    pub timeout_hours: u32,
    /// Identities expected to approve. Informational; the handler decides
    /// how to interpret them.
    #[serde(default)]
    pub required_approvers: Vec<String>,
    /// Whether an expired wait counts as approval instead of failure.
    #[serde(default)]
    pub auto_approve_on_timeout: bool,
}
