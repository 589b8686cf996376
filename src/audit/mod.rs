//! Append-only audit trail of orchestration decisions.

mod logger;

pub use logger::AuditLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub project_id: String,
    #[serde(flatten)]
    pub kind: AuditKind,
}

impl AuditEvent {
    pub fn new(project_id: &str, kind: AuditKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            project_id: project_id.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditKind {
    ProjectCreated {
        name: String,
    },
    PhaseCompleted {
        phase: String,
        version: u32,
        attempts: u32,
        confidence: f64,
    },
    PhaseEscalated {
        phase: String,
        reason: String,
    },
    PhaseFailed {
        phase: String,
        error: String,
        failure_kind: String,
    },
    GateApproved {
        gate: String,
        approver: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        score: Option<u32>,
    },
    GateRejected {
        gate: String,
        rejected_by: String,
        reason: String,
    },
    Advanced {
        from: String,
        to: String,
    },
    RolledBack {
        target: String,
        snapshot_id: String,
        removed_phases: Vec<String>,
    },
    SnapshotRestored {
        snapshot_id: String,
        restored: usize,
    },
    ClarificationsResolved {
        mode: String,
        count: usize,
    },
}

impl AuditKind {
    /// Event name as written to the log.
    pub fn name(&self) -> &'static str {
        match self {
            AuditKind::ProjectCreated { .. } => "project_created",
            AuditKind::PhaseCompleted { .. } => "phase_completed",
            AuditKind::PhaseEscalated { .. } => "phase_escalated",
            AuditKind::PhaseFailed { .. } => "phase_failed",
            AuditKind::GateApproved { .. } => "gate_approved",
            AuditKind::GateRejected { .. } => "gate_rejected",
            AuditKind::Advanced { .. } => "advanced",
            AuditKind::RolledBack { .. } => "rolled_back",
            AuditKind::SnapshotRestored { .. } => "snapshot_restored",
            AuditKind::ClarificationsResolved { .. } => "clarifications_resolved",
        }
    }
}
