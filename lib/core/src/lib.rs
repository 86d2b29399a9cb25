//! Core identifier types shared across the foreman workspace.

pub mod id;

pub use id::{CheckpointId, GateId, ParseIdError, StepId, WorkflowId};
