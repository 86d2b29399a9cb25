//! Task execution seam between the engine and agent backends.
//!
//! The engine never knows how a task runs. It looks the step's role up in
//! an `ExecutorRegistry` and hands the task string plus the shared context
//! to whatever `TaskExecutor` is registered there.

use crate::error::TaskError;
use crate::step::{AgentRole, WorkflowContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Trait implemented by agent backends that run workflow tasks.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs one task against the shared context.
    ///
    /// Context changes are visible to every later step of the workflow.
    /// The returned string is recorded as the step's output.
    async fn execute_task(
        &self,
        task: &str,
        context: &mut WorkflowContext,
    ) -> Result<String, TaskError>;
}

/// Role-keyed registry of task executors.
///
/// Dispatching a step whose role has no registered executor is an error;
/// nothing is constructed implicitly.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<AgentRole, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor for a role, replacing any previous one.
    #[must_use]
    pub fn register(mut self, role: AgentRole, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executors.insert(role, executor);
        self
    }

    /// Returns the executor registered for a role.
    #[must_use]
    pub fn get(&self, role: AgentRole) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(&role).cloned()
    }

    /// Roles with a registered executor, in name order.
    #[must_use]
    pub fn roles(&self) -> Vec<AgentRole> {
        let mut roles: Vec<AgentRole> = self.executors.keys().copied().collect();
        roles.sort_by_key(|role| role.as_str());
        roles
    }
}

/// Executor that describes what it would do instead of doing it.
///
/// Useful while wiring a workflow before the real agent backends exist.
pub struct EchoTaskExecutor {
    role: AgentRole,
}

impl EchoTaskExecutor {
    /// Creates an echo executor that reports under the given role.
    #[must_use]
    pub fn new(role: AgentRole) -> Self {
        Self { role }
    }
}

#[async_trait]
impl TaskExecutor for EchoTaskExecutor {
    async fn execute_task(
        &self,
        task: &str,
        _context: &mut WorkflowContext,
    ) -> Result<String, TaskError> {
        Ok(format!("{} would run: {task}", self.role))
    }
}

/// Scripted executor for tests.
///
/// Records every task it receives; replies according to its script.
pub struct MockExecutor {
    behavior: MockBehavior,
    calls: Mutex<Vec<String>>,
}

enum MockBehavior {
    Succeed { output: String },
    Fail { message: String },
    Sleep { delay: Duration, output: String },
}

impl MockExecutor {
    /// Executor that succeeds every task with the given output.
    #[must_use]
    pub fn succeeding(output: impl Into<String>) -> Self {
        Self {
            behavior: MockBehavior::Succeed {
                output: output.into(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Executor that fails every task with the given message.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            behavior: MockBehavior::Fail {
                message: message.into(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Executor that sleeps before succeeding, for timeout tests.
    #[must_use]
    pub fn sleeping(delay: Duration, output: impl Into<String>) -> Self {
        Self {
            behavior: MockBehavior::Sleep {
                delay,
                output: output.into(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The tasks received so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute_task(
        &self,
        task: &str,
        _context: &mut WorkflowContext,
    ) -> Result<String, TaskError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.to_string());
        match &self.behavior {
            MockBehavior::Succeed { output } => Ok(output.clone()),
            MockBehavior::Fail { message } => Err(TaskError::Failed {
                message: message.clone(),
            }),
            MockBehavior::Sleep { delay, output } => {
                tokio::time::sleep(*delay).await;
                Ok(output.clone())
            }
        }
    }
}
