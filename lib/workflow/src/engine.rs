//! Drives workflow definitions to a terminal status.
//!
//! One step at a time: scan the definition in declaration order for the
//! first unexecuted step whose dependencies are all complete, dispatch it
//! through the executor registry or the approval handler, and stop at the
//! first failure. Every observable transition flows through the
//! `StateManager`, so a configured store sees the run as it happens.

use crate::approval::{ApprovalDecision, ApprovalHandler, AutoApprove};
use crate::definition::{ExecutionPattern, WorkflowDefinition};
use crate::error::{EngineError, StateError, StepError};
use crate::executor::ExecutorRegistry;
use crate::manager::StateManager;
use crate::state::{ExecutionSummary, StepResult, seconds_between};
use crate::status::{StepStatus, WorkflowStatus};
use crate::step::{StepKind, WorkflowContext, WorkflowStep};
use chrono::Utc;
use foreman_core::{StepId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Tunable engine behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Enforce each step's `timeout_seconds` around its dispatch.
    #[serde(default = "default_enforce_step_timeouts")]
    pub enforce_step_timeouts: bool,
    /// Take a checkpoint after every this many completed steps.
    #[serde(default)]
    pub checkpoint_interval: Option<u32>,
}

fn default_enforce_step_timeouts() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enforce_step_timeouts: default_enforce_step_timeouts(),
            checkpoint_interval: None,
        }
    }
}

/// Terminal outcome of one `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// The workflow that ran.
    pub workflow_id: WorkflowId,
    /// Terminal status the workflow reached.
    pub status: WorkflowStatus,
    /// Per-step records accumulated during the run.
    pub step_results: HashMap<StepId, StepResult>,
    /// Wall-clock duration of the run.
    pub duration_seconds: f64,
    /// The failure that stopped the run, if any.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Whether the workflow reached `complete`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Complete
    }

    /// One-line human-readable account of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let completed = self
            .step_results
            .values()
            .filter(|r| r.status == StepStatus::Complete)
            .count();
        let total = self.step_results.len();
        match &self.error {
            Some(error) => format!(
                "workflow {} {}: {completed}/{total} steps completed, error: {error}",
                self.workflow_id, self.status
            ),
            None => format!(
                "workflow {} {}: {completed}/{total} steps completed in {:.2}s",
                self.workflow_id, self.status, self.duration_seconds
            ),
        }
    }
}

/// Workflow execution engine.
///
/// Owns a `StateManager` and an `ExecutorRegistry`; the approval handler
/// defaults to [`AutoApprove`] so unattended workflows keep moving.
pub struct WorkflowEngine {
    state: StateManager,
    executors: ExecutorRegistry,
    approvals: Arc<dyn ApprovalHandler>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Creates an engine over the given state manager and registry.
    #[must_use]
    pub fn new(state: StateManager, executors: ExecutorRegistry) -> Self {
        Self {
            state,
            executors,
            approvals: Arc::new(AutoApprove),
            config: EngineConfig::default(),
        }
    }

    /// Replaces the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the approval handler.
    #[must_use]
    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approvals = handler;
        self
    }

    /// Read access to the engine's state manager.
    #[must_use]
    pub fn state_manager(&self) -> &StateManager {
        &self.state
    }

    /// Mutable access to the engine's state manager, for checkpoint and
    /// recovery calls between runs.
    pub fn state_manager_mut(&mut self) -> &mut StateManager {
        &mut self.state
    }

    /// Runs a workflow to a terminal status.
    ///
    /// Never returns `Err`: every failure mode is folded into the result,
    /// and the tracked state carries the same terminal status.
    pub async fn execute(
        &mut self,
        definition: &WorkflowDefinition,
        context: Option<WorkflowContext>,
    ) -> ExecutionResult {
        let started = Utc::now();
        let workflow_id = definition.id;

        if let Err(e) = self.prepare(definition, context).await {
            return ExecutionResult {
                workflow_id,
                status: WorkflowStatus::Failed,
                step_results: HashMap::new(),
                duration_seconds: 0.0,
                error: Some(e.to_string()),
            };
        }

        tracing::info!(
            workflow_id = %workflow_id,
            workflow_name = %definition.name,
            steps = definition.steps.len(),
            "executing workflow"
        );
        if definition.pattern != ExecutionPattern::Sequential {
            tracing::debug!(
                workflow_id = %workflow_id,
                pattern = %definition.pattern,
                "pattern dispatches one step at a time in declaration order"
            );
        }

        let (status, error) = match self.run(definition).await {
            Ok(()) => (WorkflowStatus::Complete, None),
            Err(e) => (WorkflowStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self
            .state
            .update_status(workflow_id, status, error.clone())
            .await
        {
            tracing::warn!(workflow_id = %workflow_id, error = %e, "failed to record terminal status");
        }

        let step_results = self
            .state
            .state(workflow_id)
            .map(|s| s.step_results.clone())
            .unwrap_or_default();
        let result = ExecutionResult {
            workflow_id,
            status,
            step_results,
            duration_seconds: seconds_between(started, Utc::now()),
            error,
        };
        tracing::info!(
            workflow_id = %workflow_id,
            status = %result.status,
            duration_seconds = result.duration_seconds,
            "workflow finished"
        );
        result
    }

    /// Validates wiring without dispatching anything.
    ///
    /// Tracks the workflow and seeds the context exactly as `execute`
    /// would, then reports success while the state stays `pending`.
    pub async fn dry_run(
        &mut self,
        definition: &WorkflowDefinition,
        context: Option<WorkflowContext>,
    ) -> ExecutionResult {
        let workflow_id = definition.id;
        if let Err(e) = self.prepare(definition, context).await {
            return ExecutionResult {
                workflow_id,
                status: WorkflowStatus::Failed,
                step_results: HashMap::new(),
                duration_seconds: 0.0,
                error: Some(e.to_string()),
            };
        }
        ExecutionResult {
            workflow_id,
            status: WorkflowStatus::Complete,
            step_results: HashMap::new(),
            duration_seconds: 0.0,
            error: None,
        }
    }

    /// Current status of a tracked workflow.
    #[must_use]
    pub fn workflow_status(&self, workflow_id: WorkflowId) -> Option<WorkflowStatus> {
        self.state.execution_summary(workflow_id).map(|s| s.status)
    }

    /// Summaries of every tracked workflow.
    #[must_use]
    pub fn list_workflows(&self) -> Vec<ExecutionSummary> {
        self.state.list_summaries()
    }

    async fn prepare(
        &mut self,
        definition: &WorkflowDefinition,
        context: Option<WorkflowContext>,
    ) -> Result<(), StateError> {
        self.state
            .create_workflow_state(definition.id, &definition.name)
            .await?;
        if let Some(context) = context {
            self.state.set_context(definition.id, context).await?;
        }
        Ok(())
    }

    async fn run(&mut self, definition: &WorkflowDefinition) -> Result<(), EngineError> {
        let workflow_id = definition.id;
        self.state
            .update_status(workflow_id, WorkflowStatus::Running, None)
            .await?;

        let mut executed: HashSet<StepId> = HashSet::new();
        let mut since_checkpoint = 0u32;

        while executed.len() < definition.steps.len() {
            let Some(step) = next_ready_step(definition, &executed) else {
                let remaining: Vec<String> = definition
                    .steps
                    .iter()
                    .filter(|step| !executed.contains(&step.id))
                    .map(|step| step.name.clone())
                    .collect();
                return Err(EngineError::Deadlock { remaining });
            };

            self.state
                .update_step_status(workflow_id, step.id, StepStatus::Running, None, None)
                .await?;
            tracing::info!(
                workflow_id = %workflow_id,
                step_id = %step.id,
                step_name = %step.name,
                kind = step.kind.kind_name(),
                "dispatching step"
            );

            match self.dispatch(workflow_id, definition, step).await {
                Ok(output) => {
                    self.state
                        .update_step_status(
                            workflow_id,
                            step.id,
                            StepStatus::Complete,
                            Some(JsonValue::String(output)),
                            None,
                        )
                        .await?;
                    executed.insert(step.id);
                    since_checkpoint += 1;
                    if let Some(interval) = self.config.checkpoint_interval
                        && interval > 0
                        && since_checkpoint >= interval
                    {
                        self.state.create_checkpoint(workflow_id, None).await?;
                        since_checkpoint = 0;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        workflow_id = %workflow_id,
                        step_id = %step.id,
                        step_name = %step.name,
                        error = %e,
                        "step failed, stopping workflow"
                    );
                    self.state
                        .update_step_status(
                            workflow_id,
                            step.id,
                            StepStatus::Failed,
                            None,
                            Some(e.to_string()),
                        )
                        .await?;
                    return Err(EngineError::Step {
                        step: step.name.clone(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }

    async fn dispatch(
        &mut self,
        workflow_id: WorkflowId,
        definition: &WorkflowDefinition,
        step: &WorkflowStep,
    ) -> Result<String, StepError> {
        match &step.kind {
            StepKind::AgentTask { role, task } => {
                let Some(executor) = self.executors.get(*role) else {
                    return Err(StepError::ExecutorNotRegistered { role: *role });
                };
                let limit = step.timeout_seconds;
                let context = self.state.context_mut(workflow_id)?;
                if self.config.enforce_step_timeouts {
                    match tokio::time::timeout(
                        Duration::from_secs(limit),
                        executor.execute_task(task, context),
                    )
                    .await
                    {
                        Ok(result) => result.map_err(StepError::from),
                        Err(_) => Err(StepError::TimedOut {
                            limit_seconds: limit,
                        }),
                    }
                } else {
                    executor
                        .execute_task(task, context)
                        .await
                        .map_err(StepError::from)
                }
            }
            StepKind::ApprovalGate { gate: gate_id } => {
                let Some(gate) = definition.gate(*gate_id) else {
                    return Err(StepError::UnknownGate { gate: *gate_id });
                };
                self.state
                    .update_status(workflow_id, WorkflowStatus::WaitingApproval, None)
                    .await?;
                tracing::info!(
                    workflow_id = %workflow_id,
                    gate_id = %gate.id,
                    gate_name = %gate.name,
                    "workflow waiting for approval"
                );

                let handler = Arc::clone(&self.approvals);
                let limit = Duration::from_secs(u64::from(gate.timeout_hours) * 3600);
                let decision = match tokio::time::timeout(limit, handler.resolve(workflow_id, gate))
                    .await
                {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(e)) => return Err(StepError::Approval(e)),
                    Err(_) if gate.auto_approve_on_timeout => {
                        tracing::warn!(
                            workflow_id = %workflow_id,
                            gate_id = %gate.id,
                            hours = gate.timeout_hours,
                            "gate timed out, auto-approving"
                        );
                        ApprovalDecision::Approved
                    }
                    Err(_) => {
                        return Err(StepError::GateTimedOut {
                            hours: gate.timeout_hours,
                        });
                    }
                };

                match decision {
                    ApprovalDecision::Approved => {
                        self.state
                            .update_status(workflow_id, WorkflowStatus::Running, None)
                            .await?;
                        Ok(format!("approval gate '{}' approved", gate.name))
                    }
                    ApprovalDecision::Rejected { reason } => {
                        Err(StepError::GateRejected { reason })
                    }
                }
            }
            StepKind::ParallelGroup | StepKind::Conditional => Err(StepError::UnsupportedKind {
                kind: step.kind.kind_name(),
            }),
        }
    }
}

/// First unexecuted step, in declaration order, whose dependencies have
/// all executed.
fn next_ready_step<'a>(
    definition: &'a WorkflowDefinition,
    executed: &HashSet<StepId>,
) -> Option<&'a WorkflowStep> {
    definition.steps.iter().find(|step| {
        !executed.contains(&step.id)
            && definition
                .dependencies(step.id)
                .iter()
                .all(|dep| executed.contains(dep))
    })
}
