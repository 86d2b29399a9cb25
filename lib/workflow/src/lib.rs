//! Workflow orchestration engine for the foreman platform.
//!
//! This crate provides everything needed to define and run multi-agent
//! workflows:
//!
//! - **Builder**: Fluent construction of validated workflow definitions
//! - **Definitions**: Steps, dependencies, approval gates, execution patterns
//! - **State**: Per-workflow execution state with checkpoints and summaries
//! - **Engine**: Sequential dependency-ordered dispatch with fail-fast
//! - **Seams**: Injected task executors, approval handlers, and state stores

pub mod approval;
pub mod builder;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod manager;
pub mod state;
pub mod status;
pub mod step;
pub mod store;

pub use approval::{
    ApprovalDecision, ApprovalHandler, AutoApprove, ChannelApprovalHandler, PendingApprovals,
};
pub use builder::{GateSpec, StepSpec, WorkflowBuilder};
pub use definition::{ExecutionPattern, WorkflowDefinition};
pub use engine::{EngineConfig, ExecutionResult, WorkflowEngine};
pub use error::{
    ApprovalError, EngineError, StateError, StepError, StoreError, TaskError, ValidationError,
};
pub use executor::{EchoTaskExecutor, ExecutorRegistry, MockExecutor, TaskExecutor};
pub use manager::StateManager;
pub use state::{Checkpoint, ExecutionSummary, StepResult, WorkflowState};
pub use status::{StepStatus, WorkflowStatus};
pub use step::{AgentRole, ApprovalGate, StepKind, WorkflowContext, WorkflowStep};
pub use store::{FileStateStore, InMemoryStateStore, StateStore};
