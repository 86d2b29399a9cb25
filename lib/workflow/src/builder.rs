//! Fluent construction and validation of workflow definitions.
//!
//! Steps are declared with caller-chosen names; the builder assigns the
//! synthetic ids (`step-0`, `step-1`, ...) and resolves name-based
//! dependency references to ids once, at `build()`. Validation rejects
//! duplicate names, dependency cycles, and references to steps that were
//! never declared.

use crate::definition::{ExecutionPattern, WorkflowDefinition};
use crate::error::ValidationError;
use crate::step::{
    AgentRole, ApprovalGate, StepKind, WorkflowStep, DEFAULT_GATE_TIMEOUT_HOURS,
    DEFAULT_STEP_RETRY_LIMIT, DEFAULT_STEP_TIMEOUT_SECONDS,
};
use chrono::Utc;
use foreman_core::{GateId, StepId, WorkflowId};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Declarative description of one agent-task step, before ids exist.
#[derive(Debug, Clone)]
pub struct StepSpec {
    name: String,
    role: AgentRole,
    task: String,
    depends_on: Vec<String>,
    timeout_seconds: u64,
    retry_limit: u32,
    metadata: HashMap<String, JsonValue>,
}

impl StepSpec {
    /// Creates a spec with the default timeout and retry allowance.
    #[must_use]
    pub fn new(name: impl Into<String>, role: AgentRole, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role,
            task: task.into(),
            depends_on: Vec::new(),
            timeout_seconds: DEFAULT_STEP_TIMEOUT_SECONDS,
            retry_limit: DEFAULT_STEP_RETRY_LIMIT,
            metadata: HashMap::new(),
        }
    }

    /// Names of the steps that must complete before this one.
    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the execution time limit.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Overrides the retry allowance recorded for the executor.
    #[must_use]
    pub fn retry_limit(mut self, retries: u32) -> Self {
        self.retry_limit = retries;
        self
    }

    /// Attaches an opaque metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Declarative description of an approval gate.
#[derive(Debug, Clone)]
pub struct GateSpec {
    name: String,
    description: String,
    timeout_hours: u32,
    required_approvers: Vec<String>,
    auto_approve_on_timeout: bool,
}

impl GateSpec {
    /// Creates a spec with the default timeout and no named approvers.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            timeout_hours: DEFAULT_GATE_TIMEOUT_HOURS,
            required_approvers: Vec::new(),
            auto_approve_on_timeout: false,
        }
    }

    /// Overrides how long the gate waits for a decision.
    #[must_use]
    pub fn timeout_hours(mut self, hours: u32) -> Self {
        self.timeout_hours = hours;
        self
    }

    /// Records who is expected to approve.
    #[must_use]
    pub fn approvers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_approvers = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Treats an expired wait as approval instead of failure.
    #[must_use]
    pub fn auto_approve_on_timeout(mut self, auto: bool) -> Self {
        self.auto_approve_on_timeout = auto;
        self
    }
}

/// Fluent builder for `WorkflowDefinition`s.
#[derive(Debug)]
pub struct WorkflowBuilder {
    name: String,
    description: String,
    pattern: ExecutionPattern,
    steps: Vec<WorkflowStep>,
    approval_gates: Vec<ApprovalGate>,
    counter: u32,
}

impl WorkflowBuilder {
    /// Starts an empty sequential workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pattern: ExecutionPattern::default(),
            steps: Vec::new(),
            approval_gates: Vec::new(),
            counter: 0,
        }
    }

    /// Sets the workflow description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declares the sequential pattern (the default).
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.pattern = ExecutionPattern::Sequential;
        self
    }

    /// Declares the parallel pattern.
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.pattern = ExecutionPattern::Parallel;
        self
    }

    /// Declares the debate pattern.
    #[must_use]
    pub fn debate(mut self) -> Self {
        self.pattern = ExecutionPattern::Debate;
        self
    }

    /// Declares the adaptive pattern.
    #[must_use]
    pub fn adaptive(mut self) -> Self {
        self.pattern = ExecutionPattern::Adaptive;
        self
    }

    fn next_step_id(&mut self) -> StepId {
        let id = StepId::new(self.counter);
        self.counter += 1;
        id
    }

    /// Appends an agent-task step.
    #[must_use]
    pub fn add_step(mut self, spec: StepSpec) -> Self {
        let id = self.next_step_id();
        self.steps.push(WorkflowStep {
            id,
            name: spec.name,
            kind: StepKind::AgentTask {
                role: spec.role,
                task: spec.task,
            },
            depends_on: spec.depends_on,
            timeout_seconds: spec.timeout_seconds,
            retry_limit: spec.retry_limit,
            metadata: spec.metadata,
        });
        self
    }

    /// Appends a group of steps that share one dependency set and carry no
    /// ordering among themselves.
    ///
    /// The shared `depends_on` set replaces whatever the individual specs
    /// declared. Each step's metadata records the group label under
    /// `"parallel_group"`. The label consumes one id-counter tick, so step
    /// ids stay monotonic but skip one position.
    #[must_use]
    pub fn add_parallel_steps<I, D, S>(mut self, specs: I, depends_on: D) -> Self
    where
        I: IntoIterator<Item = StepSpec>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group = format!("parallel-{}", self.counter);
        self.counter += 1;
        let shared_deps: Vec<String> = depends_on.into_iter().map(Into::into).collect();

        for spec in specs {
            let id = self.next_step_id();
            let mut metadata = spec.metadata;
            metadata.insert(
                "parallel_group".to_string(),
                JsonValue::String(group.clone()),
            );
            self.steps.push(WorkflowStep {
                id,
                name: spec.name,
                kind: StepKind::AgentTask {
                    role: spec.role,
                    task: spec.task,
                },
                depends_on: shared_deps.clone(),
                timeout_seconds: spec.timeout_seconds,
                retry_limit: spec.retry_limit,
                metadata,
            });
        }
        self
    }

    /// Appends an approval gate and the step that parks on it.
    ///
    /// Gate steps declare no dependencies; under the declaration-order scan
    /// they run at the position they were added.
    #[must_use]
    pub fn add_approval_gate(mut self, spec: GateSpec) -> Self {
        let gate_id = GateId::new(self.approval_gates.len() as u32);
        self.approval_gates.push(ApprovalGate {
            id: gate_id,
            name: spec.name.clone(),
            description: spec.description,
            timeout_hours: spec.timeout_hours,
            required_approvers: spec.required_approvers,
            auto_approve_on_timeout: spec.auto_approve_on_timeout,
        });

        let id = self.next_step_id();
        self.steps.push(WorkflowStep {
            id,
            name: spec.name,
            kind: StepKind::ApprovalGate { gate: gate_id },
            depends_on: Vec::new(),
            timeout_seconds: DEFAULT_STEP_TIMEOUT_SECONDS,
            retry_limit: DEFAULT_STEP_RETRY_LIMIT,
            metadata: HashMap::new(),
        });
        self
    }

    /// Validates the declared steps and produces the immutable definition.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if two steps share a name, the dependency
    /// graph contains a cycle, or a `depends_on` entry names no step.
    pub fn build(self) -> Result<WorkflowDefinition, ValidationError> {
        let dependency_index = validate(&self.steps)?;
        Ok(WorkflowDefinition {
            id: WorkflowId::new(),
            name: self.name,
            description: self.description,
            pattern: self.pattern,
            steps: self.steps,
            approval_gates: self.approval_gates,
            created_at: Utc::now(),
            dependency_index,
        })
    }
}

/// Validates step names and dependencies, returning the resolved
/// dependency index.
///
/// Checks run in a fixed order: duplicate names first (they make name
/// resolution ambiguous), then cycles, then dangling references.
pub(crate) fn validate(
    steps: &[WorkflowStep],
) -> Result<HashMap<StepId, Vec<StepId>>, ValidationError> {
    let mut ids_by_name: HashMap<&str, StepId> = HashMap::with_capacity(steps.len());
    for step in steps {
        if ids_by_name.insert(step.name.as_str(), step.id).is_some() {
            return Err(ValidationError::DuplicateStepName {
                name: step.name.clone(),
            });
        }
    }

    check_cycles(steps)?;

    let mut index = HashMap::with_capacity(steps.len());
    for step in steps {
        let mut deps = Vec::with_capacity(step.depends_on.len());
        for dependency in &step.depends_on {
            match ids_by_name.get(dependency.as_str()) {
                Some(&dep_id) => deps.push(dep_id),
                None => {
                    return Err(ValidationError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        index.insert(step.id, deps);
    }
    Ok(index)
}

/// Cycle detection over the name-keyed dependency graph.
///
/// Dependency names that match no declared step cannot close a cycle; they
/// are ignored here and reported by the dangling-reference check instead.
fn check_cycles(steps: &[WorkflowStep]) -> Result<(), ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut node_indices: HashMap<&str, NodeIndex> = HashMap::with_capacity(steps.len());

    for step in steps {
        let index = graph.add_node(step.name.as_str());
        node_indices.insert(step.name.as_str(), index);
    }
    for step in steps {
        let step_index = node_indices[step.name.as_str()];
        for dependency in &step.depends_on {
            if let Some(&dep_index) = node_indices.get(dependency.as_str()) {
                graph.add_edge(dep_index, step_index, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(_) => Ok(()),
        Err(cycle) => Err(ValidationError::CyclicDependency {
            step: graph[cycle.node_id()].to_string(),
        }),
    }
}
