//! Approval gate resolution.
//!
//! An approval gate parks the engine until somebody decides. The decision
//! seam is `ApprovalHandler`; the engine bounds the wait with the gate's
//! timeout. `AutoApprove` keeps unattended workflows moving, while
//! `ChannelApprovalHandler` + `PendingApprovals` let any other task resolve
//! a parked gate by id.

use crate::error::ApprovalError;
use crate::step::ApprovalGate;
use async_trait::async_trait;
use foreman_core::{GateId, WorkflowId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Outcome of an approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// The workflow may continue past the gate.
    Approved,
    /// The workflow must stop at the gate.
    Rejected { reason: String },
}

/// Trait implemented by approval backends.
///
/// `resolve` may suspend for as long as it likes; the engine wraps the
/// call in the gate's timeout.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Produces a decision for one gate of one workflow.
    async fn resolve(
        &self,
        workflow_id: WorkflowId,
        gate: &ApprovalGate,
    ) -> Result<ApprovalDecision, ApprovalError>;
}

/// Handler that approves every gate immediately.
///
/// The engine's default, so workflows run unattended unless a real
/// handler is injected.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn resolve(
        &self,
        workflow_id: WorkflowId,
        gate: &ApprovalGate,
    ) -> Result<ApprovalDecision, ApprovalError> {
        tracing::debug!(
            workflow_id = %workflow_id,
            gate_id = %gate.id,
            gate_name = %gate.name,
            "auto-approving gate"
        );
        Ok(ApprovalDecision::Approved)
    }
}

/// Shared ledger of gates currently waiting for a decision.
///
/// Clone it freely: all clones observe and resolve the same waiters.
#[derive(Clone, Default)]
pub struct PendingApprovals {
    waiters: Arc<Mutex<HashMap<(WorkflowId, GateId), oneshot::Sender<ApprovalDecision>>>>,
}

impl PendingApprovals {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a decision to the waiter parked on the gate.
    ///
    /// Returns `false` when no waiter is parked there, or when the waiting
    /// side has already gone away (for example after a gate timeout).
    pub fn resolve(
        &self,
        workflow_id: WorkflowId,
        gate_id: GateId,
        decision: ApprovalDecision,
    ) -> bool {
        let sender = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(workflow_id, gate_id));
        match sender {
            Some(sender) => sender.send(decision).is_ok(),
            None => false,
        }
    }

    /// The gates currently waiting, ordered by workflow then gate.
    #[must_use]
    pub fn pending(&self) -> Vec<(WorkflowId, GateId)> {
        let mut keys: Vec<(WorkflowId, GateId)> = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        keys.sort_by_key(|(workflow_id, gate_id)| (workflow_id.as_ulid(), gate_id.index()));
        keys
    }

    /// Parks a new waiter on the gate, displacing any previous one.
    fn register(
        &self,
        workflow_id: WorkflowId,
        gate_id: GateId,
    ) -> oneshot::Receiver<ApprovalDecision> {
        let (sender, receiver) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((workflow_id, gate_id), sender);
        receiver
    }
}

/// Handler that parks on a [`PendingApprovals`] ledger until somebody
/// calls [`PendingApprovals::resolve`] for the gate.
pub struct ChannelApprovalHandler {
    pending: PendingApprovals,
}

impl ChannelApprovalHandler {
    /// Creates a handler that waits on the given ledger.
    #[must_use]
    pub fn new(pending: PendingApprovals) -> Self {
        Self { pending }
    }
}

#[async_trait]
impl ApprovalHandler for ChannelApprovalHandler {
    async fn resolve(
        &self,
        workflow_id: WorkflowId,
        gate: &ApprovalGate,
    ) -> Result<ApprovalDecision, ApprovalError> {
        let receiver = self.pending.register(workflow_id, gate.id);
        tracing::info!(
            workflow_id = %workflow_id,
            gate_id = %gate.id,
            gate_name = %gate.name,
            "gate waiting for approval"
        );
        receiver.await.map_err(|_| ApprovalError::ResolutionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::DEFAULT_GATE_TIMEOUT_HOURS;
    use std::time::Duration;

    fn create_gate(index: u32) -> ApprovalGate {
        ApprovalGate {
            id: GateId::new(index),
            name: format!("gate {index}"),
            description: "review before rollout".to_string(),
            timeout_hours: DEFAULT_GATE_TIMEOUT_HOURS,
            required_approvers: vec!["release-manager".to_string()],
            auto_approve_on_timeout: false,
        }
    }

    #[tokio::test]
    async fn auto_approve_approves_immediately() {
        let decision = AutoApprove
            .resolve(WorkflowId::new(), &create_gate(0))
            .await
            .expect("resolves");
        assert_eq!(decision, ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn channel_handler_delivers_the_decision() {
        let pending = PendingApprovals::new();
        let handler = ChannelApprovalHandler::new(pending.clone());
        let workflow_id = WorkflowId::new();
        let gate = create_gate(0);
        let gate_id = gate.id;

        let wait = tokio::spawn(async move { handler.resolve(workflow_id, &gate).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(pending.pending(), vec![(workflow_id, gate_id)]);
        assert!(pending.resolve(workflow_id, gate_id, ApprovalDecision::Approved));

        let decision = wait.await.expect("join").expect("resolved");
        assert_eq!(decision, ApprovalDecision::Approved);
        assert!(pending.pending().is_empty());
    }

    #[tokio::test]
    async fn rejection_carries_the_reason() {
        let pending = PendingApprovals::new();
        let handler = ChannelApprovalHandler::new(pending.clone());
        let workflow_id = WorkflowId::new();
        let gate = create_gate(1);
        let gate_id = gate.id;

        let wait = tokio::spawn(async move { handler.resolve(workflow_id, &gate).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pending.resolve(
            workflow_id,
            gate_id,
            ApprovalDecision::Rejected {
                reason: "schema change unreviewed".to_string(),
            },
        );
        let decision = wait.await.expect("join").expect("resolved");
        assert_eq!(
            decision,
            ApprovalDecision::Rejected {
                reason: "schema change unreviewed".to_string()
            }
        );
    }

    #[tokio::test]
    async fn resolving_an_unparked_gate_reports_false() {
        let pending = PendingApprovals::new();
        assert!(!pending.resolve(
            WorkflowId::new(),
            GateId::new(0),
            ApprovalDecision::Approved
        ));
    }

    #[tokio::test]
    async fn displaced_waiter_sees_the_channel_close() {
        let pending = PendingApprovals::new();
        let workflow_id = WorkflowId::new();
        let gate = create_gate(0);
        let gate_id = gate.id;

        let first_handler = ChannelApprovalHandler::new(pending.clone());
        let first_gate = gate.clone();
        let first =
            tokio::spawn(async move { first_handler.resolve(workflow_id, &first_gate).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A second park on the same gate displaces the first waiter.
        let second_handler = ChannelApprovalHandler::new(pending.clone());
        let second =
            tokio::spawn(async move { second_handler.resolve(workflow_id, &gate).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = first.await.expect("join").unwrap_err();
        assert_eq!(err, ApprovalError::ResolutionClosed);

        assert!(pending.resolve(workflow_id, gate_id, ApprovalDecision::Approved));
        let decision = second.await.expect("join").expect("resolved");
        assert_eq!(decision, ApprovalDecision::Approved);
    }
}
