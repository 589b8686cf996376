//! Approval gates: per-project governance checkpoints attached to phases.
//!
//! One `ApprovalGateRecord` exists per (project, gate) from project creation
//! onward. A record leaves `pending` exactly once; the store applies the
//! transition as a compare-and-set so a racing approve and reject cannot both
//! succeed. Only a rollback puts a decided record back to `pending`.

use crate::errors::GateError;
use crate::phase::{GateDefinition, PhaseRegistry};
use crate::store::{GateStore, GateTransition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Approved,
    AutoApproved,
    Rejected,
}

impl GateStatus {
    /// Approved either manually or by score.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, GateStatus::Approved | GateStatus::AutoApproved)
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateStatus::Pending => "pending",
            GateStatus::Approved => "approved",
            GateStatus::AutoApproved => "auto_approved",
            GateStatus::Rejected => "rejected",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGateRecord {
    pub project_id: String,
    pub gate: String,
    pub phase: String,
    pub status: GateStatus,
    /// Approver or rejecter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    /// Approval notes, or the rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ApprovalGateRecord {
    pub fn pending(project_id: &str, gate: &str, phase: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            gate: gate.to_string(),
            phase: phase.to_string(),
            status: GateStatus::Pending,
            decided_by: None,
            decided_at: None,
            score: None,
            notes: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.status = GateStatus::Pending;
        self.decided_by = None;
        self.decided_at = None;
        self.score = None;
        self.notes = None;
    }
}

#[derive(Debug, Clone)]
pub struct ApproveRequest {
    pub project_id: String,
    pub gate: String,
    pub approver: String,
    pub score: Option<u32>,
    pub notes: Option<String>,
}

impl ApproveRequest {
    pub fn new(project_id: &str, gate: &str, approver: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            gate: gate.to_string(),
            approver: approver.to_string(),
            score: None,
            notes: None,
        }
    }

    pub fn with_score(mut self, score: u32) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RejectRequest {
    pub project_id: String,
    pub gate: String,
    pub rejected_by: String,
    pub reason: String,
}

impl RejectRequest {
    pub fn new(project_id: &str, gate: &str, rejected_by: &str, reason: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            gate: gate.to_string(),
            rejected_by: rejected_by.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// True iff the gate defines a threshold and `score` reaches it.
pub fn meets_threshold(definition: &GateDefinition, score: u32) -> bool {
    definition
        .auto_approve_threshold
        .is_some_and(|threshold| score >= threshold)
}

pub struct ApprovalGateService {
    registry: Arc<PhaseRegistry>,
    store: Arc<dyn GateStore>,
}

impl ApprovalGateService {
    pub fn new(registry: Arc<PhaseRegistry>, store: Arc<dyn GateStore>) -> Self {
        Self { registry, store }
    }

    /// Create a pending record for every gate in the registry.
    ///
    /// Records that already exist are left alone, so calling this again after
    /// the registry gained a gate only adds the new one.
    pub async fn initialize_gates_for_project(&self, project_id: &str) -> Result<usize, GateError> {
        let records = self
            .registry
            .gates()
            .iter()
            .map(|g| ApprovalGateRecord::pending(project_id, &g.name, &g.phase))
            .collect();
        let inserted = self.store.insert_gates(project_id, records).await?;
        info!(project = project_id, inserted, "Initialized approval gates");
        Ok(inserted)
    }

    pub fn should_auto_approve(&self, gate: &str, score: u32) -> bool {
        self.registry
            .gate(gate)
            .is_some_and(|definition| meets_threshold(definition, score))
    }

    pub async fn approve_gate(&self, req: ApproveRequest) -> Result<ApprovalGateRecord, GateError> {
        self.definition(&req.gate)?;
        if let Some(score) = req.score
            && score > 100
        {
            return Err(GateError::InvalidScore { score });
        }

        let status = match req.score {
            Some(score) if self.should_auto_approve(&req.gate, score) => GateStatus::AutoApproved,
            _ => GateStatus::Approved,
        };

        let record = self
            .decide(&req.project_id, &req.gate, |record| {
                record.status = status;
                record.decided_by = Some(req.approver.clone());
                record.score = req.score;
                record.notes = req.notes.clone();
            })
            .await?;
        let record = self.apply(&req.project_id, record).await?;

        info!(
            project = %req.project_id,
            gate = %req.gate,
            approver = %req.approver,
            status = %record.status,
            "Gate approved"
        );
        Ok(record)
    }

    pub async fn reject_gate(&self, req: RejectRequest) -> Result<ApprovalGateRecord, GateError> {
        self.definition(&req.gate)?;

        let record = self
            .decide(&req.project_id, &req.gate, |record| {
                record.status = GateStatus::Rejected;
                record.decided_by = Some(req.rejected_by.clone());
                record.notes = Some(req.reason.clone());
            })
            .await?;
        let record = self.apply(&req.project_id, record).await?;

        info!(
            project = %req.project_id,
            gate = %req.gate,
            rejected_by = %req.rejected_by,
            reason = %req.reason,
            "Gate rejected"
        );
        Ok(record)
    }

    /// Current status, or `None` when the project has no record for the gate.
    pub async fn check_gate_status(
        &self,
        project_id: &str,
        gate: &str,
    ) -> Result<Option<GateStatus>, GateError> {
        Ok(self
            .store
            .get_gate(project_id, gate)
            .await?
            .map(|record| record.status))
    }

    pub async fn list_gates(&self, project_id: &str) -> Result<Vec<ApprovalGateRecord>, GateError> {
        let mut records = self.store.list_gates(project_id).await?;
        records.sort_by_key(|r| self.registry.position(&r.phase).unwrap_or(usize::MAX));
        Ok(records)
    }

    /// Names of the phase's blocking gates that are not approved yet.
    pub async fn unsatisfied_blocking_gates(
        &self,
        project_id: &str,
        phase: &str,
    ) -> Result<Vec<String>, GateError> {
        let mut unsatisfied = Vec::new();
        for definition in self.registry.blocking_gates_for_phase(phase) {
            let status = self.check_gate_status(project_id, &definition.name).await?;
            if !status.is_some_and(|s| s.is_satisfied()) {
                unsatisfied.push(definition.name.clone());
            }
        }
        Ok(unsatisfied)
    }

    /// True when the phase has no blocking gates or all of them are approved.
    pub async fn can_proceed_from_phase(
        &self,
        project_id: &str,
        phase: &str,
    ) -> Result<bool, GateError> {
        Ok(self
            .unsatisfied_blocking_gates(project_id, phase)
            .await?
            .is_empty())
    }

    fn definition(&self, gate: &str) -> Result<&GateDefinition, GateError> {
        self.registry.gate(gate).ok_or_else(|| GateError::UnknownGate {
            gate: gate.to_string(),
        })
    }

    /// Build the decided record from the current pending one.
    async fn decide(
        &self,
        project_id: &str,
        gate: &str,
        update: impl FnOnce(&mut ApprovalGateRecord),
    ) -> Result<ApprovalGateRecord, GateError> {
        let mut record = self.store.get_gate(project_id, gate).await?.ok_or_else(|| {
            GateError::NotInitialized {
                project: project_id.to_string(),
                gate: gate.to_string(),
            }
        })?;
        if record.status != GateStatus::Pending {
            return Err(GateError::AlreadyDecided {
                gate: gate.to_string(),
                status: record.status.to_string(),
            });
        }
        update(&mut record);
        record.decided_at = Some(Utc::now());
        Ok(record)
    }

    async fn apply(
        &self,
        project_id: &str,
        record: ApprovalGateRecord,
    ) -> Result<ApprovalGateRecord, GateError> {
        let gate = record.gate.clone();
        match self
            .store
            .transition_gate(project_id, GateStatus::Pending, record)
            .await?
        {
            GateTransition::Applied(record) => Ok(record),
            GateTransition::StatusMismatch(current) => Err(GateError::AlreadyDecided {
                gate,
                status: current.status.to_string(),
            }),
            GateTransition::Missing => Err(GateError::NotInitialized {
                project: project_id.to_string(),
                gate,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use crate::store::{MemoryStore, ProjectStore};

    async fn service() -> ApprovalGateService {
        let store = Arc::new(MemoryStore::new());
        store
            .create_project(Project::new("acme", "Acme", "ANALYSIS"))
            .await
            .unwrap();
        let service = ApprovalGateService::new(Arc::new(PhaseRegistry::builtin()), store);
        service.initialize_gates_for_project("acme").await.unwrap();
        service
    }

    // =========================================
    // Auto-approval thresholds
    // =========================================

    #[tokio::test]
    async fn test_should_auto_approve_thresholds() {
        let service = service().await;
        assert!(service.should_auto_approve("architecture_approved", 96));
        assert!(service.should_auto_approve("architecture_approved", 95));
        assert!(!service.should_auto_approve("architecture_approved", 94));
        assert!(!service.should_auto_approve("stack_approved", 100));
        assert!(!service.should_auto_approve("no_such_gate", 100));
    }

    #[tokio::test]
    async fn test_approve_with_high_score_is_auto_approved() {
        let service = service().await;
        let record = service
            .approve_gate(ApproveRequest::new("acme", "prd_approved", "alice").with_score(92))
            .await
            .unwrap();
        assert_eq!(record.status, GateStatus::AutoApproved);
        assert_eq!(record.score, Some(92));
        assert!(record.decided_at.is_some());
    }

    #[tokio::test]
    async fn test_approve_below_threshold_is_manual_approval() {
        let service = service().await;
        let record = service
            .approve_gate(
                ApproveRequest::new("acme", "prd_approved", "alice")
                    .with_score(50)
                    .with_notes("ok for now"),
            )
            .await
            .unwrap();
        assert_eq!(record.status, GateStatus::Approved);
        assert_eq!(record.notes.as_deref(), Some("ok for now"));
    }

    #[tokio::test]
    async fn test_score_out_of_range() {
        let service = service().await;
        let err = service
            .approve_gate(ApproveRequest::new("acme", "prd_approved", "alice").with_score(101))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::InvalidScore { score: 101 }));
    }

    // =========================================
    // Decisions are terminal
    // =========================================

    #[tokio::test]
    async fn test_reject_records_reason() {
        let service = service().await;
        let record = service
            .reject_gate(RejectRequest::new(
                "acme",
                "stack_approved",
                "bob",
                "Too many moving parts",
            ))
            .await
            .unwrap();
        assert_eq!(record.status, GateStatus::Rejected);
        assert_eq!(record.decided_by.as_deref(), Some("bob"));
        assert_eq!(record.notes.as_deref(), Some("Too many moving parts"));
    }

    #[tokio::test]
    async fn test_second_decision_is_rejected() {
        let service = service().await;
        service
            .approve_gate(ApproveRequest::new("acme", "stack_approved", "alice"))
            .await
            .unwrap();
        let err = service
            .reject_gate(RejectRequest::new("acme", "stack_approved", "bob", "no"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::AlreadyDecided { .. }));
        assert_eq!(
            service
                .check_gate_status("acme", "stack_approved")
                .await
                .unwrap(),
            Some(GateStatus::Approved)
        );
    }

    #[tokio::test]
    async fn test_unknown_gate() {
        let service = service().await;
        let err = service
            .approve_gate(ApproveRequest::new("acme", "vibes_approved", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::UnknownGate { .. }));
    }

    #[tokio::test]
    async fn test_uninitialized_gate() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_project(Project::new("acme", "Acme", "ANALYSIS"))
            .await
            .unwrap();
        let service = ApprovalGateService::new(Arc::new(PhaseRegistry::builtin()), store);
        let err = service
            .approve_gate(ApproveRequest::new("acme", "stack_approved", "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::NotInitialized { .. }));
    }

    // =========================================
    // can_proceed_from_phase
    // =========================================

    #[tokio::test]
    async fn test_can_proceed_without_blocking_gates() {
        let service = service().await;
        assert!(service.can_proceed_from_phase("acme", "ANALYSIS").await.unwrap());
        // design_approved is advisory
        assert!(service
            .can_proceed_from_phase("acme", "SPEC_DESIGN_COMPONENTS")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_can_proceed_requires_approval() {
        let service = service().await;
        assert!(!service
            .can_proceed_from_phase("acme", "STACK_SELECTION")
            .await
            .unwrap());

        service
            .reject_gate(RejectRequest::new("acme", "dependencies_approved", "ops", "no"))
            .await
            .unwrap();
        assert!(!service
            .can_proceed_from_phase("acme", "DEPENDENCIES")
            .await
            .unwrap());

        service
            .approve_gate(ApproveRequest::new("acme", "stack_approved", "alice"))
            .await
            .unwrap();
        assert!(service
            .can_proceed_from_phase("acme", "STACK_SELECTION")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let service = service().await;
        assert_eq!(service.initialize_gates_for_project("acme").await.unwrap(), 0);
        assert_eq!(service.list_gates("acme").await.unwrap().len(), 5);
        assert_eq!(
            service.list_gates("acme").await.unwrap()[0].gate,
            "stack_approved"
        );
    }

    #[tokio::test]
    async fn test_check_gate_status_unknown_is_none() {
        let service = service().await;
        assert_eq!(service.check_gate_status("acme", "nope").await.unwrap(), None);
    }
}
