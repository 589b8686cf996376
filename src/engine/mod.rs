//! The orchestration engine.
//!
//! `Engine` owns the phase registry and composes the collaborators: the agent
//! executor produces artifacts, the inline validator is the fast gate, the
//! checker is the quality gate and the approval gates govern advancing. It is
//! the only component that mutates a `Project`.
//!
//! Expected outcomes (a phase failing, a critic escalating) come back as
//! `PhaseExecutionResult` / `PhaseOutcome`; `EngineError` is reserved for
//! requests that cannot be honoured at all.

pub mod executor;
mod runner;

pub use executor::{
    AgentExecutor, CommandAgentExecutor, ExecutionPolicy, PhaseParams, parse_artifacts,
};

use crate::artifact::{self, ArtifactMap};
use crate::audit::{AuditEvent, AuditKind, AuditLog};
use crate::checker::{CheckerPattern, CheckerResult};
use crate::clarification::{self, ClarificationMode, ClarificationQuestion};
use crate::errors::EngineError;
use crate::gates::{ApprovalGateRecord, ApprovalGateService, ApproveRequest, RejectRequest};
use crate::phase::{PhaseRegistry, Stage};
use crate::project::{Project, validate_slug};
use crate::remediation::{Remediation, RemediationPlanner};
use crate::rollback::{
    RestoreOutcome, RollbackOutcome, RollbackPreview, RollbackRequest, RollbackService, Snapshot,
};
use crate::store::Stores;
use crate::validation::{InlineValidator, ValidationReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Result of one generation attempt for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecutionResult {
    pub phase: String,
    /// Executor returned artifacts and no validator reported an error
    pub success: bool,
    pub artifacts: ArtifactMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: Duration,
    #[serde(default)]
    pub validation: ValidationReport,
    /// Critic verdict; absent when the attempt failed before review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<CheckerResult>,
    pub attempts: u32,
}

impl PhaseExecutionResult {
    fn failed(phase: &str, error: String, duration: Duration, attempts: u32) -> Self {
        Self {
            phase: phase.to_string(),
            success: false,
            artifacts: ArtifactMap::new(),
            error: Some(error),
            duration,
            validation: ValidationReport::default(),
            review: None,
            attempts,
        }
    }
}

/// How a full phase run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// Approved and persisted as artifact `version`.
    Completed {
        result: PhaseExecutionResult,
        version: u32,
    },
    /// Needs human attention; nothing persisted.
    Escalated {
        result: PhaseExecutionResult,
        reason: String,
    },
    /// Executor or validation failure, with the chosen remediation.
    Failed {
        result: PhaseExecutionResult,
        remediation: Remediation,
    },
}

impl PhaseOutcome {
    pub fn result(&self) -> &PhaseExecutionResult {
        match self {
            PhaseOutcome::Completed { result, .. }
            | PhaseOutcome::Escalated { result, .. }
            | PhaseOutcome::Failed { result, .. } => result,
        }
    }

    pub fn phase(&self) -> &str {
        &self.result().phase
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PhaseOutcome::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            PhaseOutcome::Completed { .. } => "completed",
            PhaseOutcome::Escalated { .. } => "escalated",
            PhaseOutcome::Failed { .. } => "failed",
        }
    }
}

/// Per-phase results of a parallel group, keyed by phase name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelGroupResults {
    pub group: String,
    order: Vec<String>,
    results: BTreeMap<String, PhaseExecutionResult>,
}

impl ParallelGroupResults {
    pub fn get(&self, phase: &str) -> Option<&PhaseExecutionResult> {
        self.results.get(phase)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn successes(&self) -> Vec<&PhaseExecutionResult> {
        self.iter().filter(|r| r.success).collect()
    }

    pub fn failures(&self) -> Vec<&PhaseExecutionResult> {
        self.iter().filter(|r| !r.success).collect()
    }

    /// Results in group order.
    pub fn iter(&self) -> impl Iterator<Item = &PhaseExecutionResult> {
        self.order.iter().filter_map(|p| self.results.get(p))
    }

    pub fn into_vec(mut self) -> Vec<PhaseExecutionResult> {
        self.order
            .iter()
            .filter_map(|p| self.results.remove(p))
            .collect()
    }

    fn take(&mut self, phase: &str) -> Option<PhaseExecutionResult> {
        self.results.remove(phase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceOutcome {
    pub previous_phase: String,
    pub new_phase: String,
    /// Phases appended to `phases_completed` by this advance
    pub completed: Vec<String>,
}

pub struct Engine {
    registry: Arc<PhaseRegistry>,
    executor: Arc<dyn AgentExecutor>,
    validator: InlineValidator,
    checker: CheckerPattern,
    gates: ApprovalGateService,
    rollback: RollbackService,
    remediation: RemediationPlanner,
    stores: Stores,
    audit: Option<AuditLog>,
    clarification_mode: ClarificationMode,
}

impl Engine {
    /// Engine with the registry's built-in validators and no critic.
    pub fn new(registry: Arc<PhaseRegistry>, executor: Arc<dyn AgentExecutor>, stores: Stores) -> Self {
        Self {
            validator: InlineValidator::for_registry(&registry),
            checker: CheckerPattern::disabled(),
            gates: ApprovalGateService::new(registry.clone(), stores.gates.clone()),
            rollback: RollbackService::new(registry.clone(), stores.clone()),
            remediation: RemediationPlanner::new(registry.clone()),
            registry,
            executor,
            stores,
            audit: None,
            clarification_mode: ClarificationMode::default(),
        }
    }

    pub fn with_checker(mut self, checker: CheckerPattern) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_validator(mut self, validator: InlineValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_clarification_mode(mut self, mode: ClarificationMode) -> Self {
        self.clarification_mode = mode;
        self
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    pub fn gates(&self) -> &ApprovalGateService {
        &self.gates
    }

    pub fn validator(&self) -> &InlineValidator {
        &self.validator
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn remediation(&self) -> &RemediationPlanner {
        &self.remediation
    }

    // =========================================
    // Projects
    // =========================================

    /// Create a project at the first registry phase with every gate pending.
    pub async fn create_project(&self, slug: &str, name: &str) -> Result<Project, EngineError> {
        validate_slug(slug).map_err(|e| EngineError::InvalidProjectId {
            id: slug.to_string(),
            reason: e.to_string(),
        })?;

        let project = Project::new(slug, name, &self.registry.first_phase().name);
        let project = self.stores.projects.create_project(project).await?;
        let gates = self.gates.initialize_gates_for_project(slug).await?;

        info!(project = slug, gates, "Created project");
        self.record(
            slug,
            AuditKind::ProjectCreated {
                name: name.to_string(),
            },
        );
        Ok(project)
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project, EngineError> {
        Ok(self.stores.projects.get_project(project_id).await?)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, EngineError> {
        Ok(self.stores.projects.list_projects().await?)
    }

    /// Current content of every artifact produced by phases before `phase`'s stage.
    pub async fn accumulated_artifacts(
        &self,
        project_id: &str,
        phase: &str,
    ) -> Result<ArtifactMap, EngineError> {
        let order: Vec<String> = self
            .registry
            .phases_before_stage_of(phase)
            .into_iter()
            .map(|p| p.name.clone())
            .collect();
        let records = self.stores.artifacts.list_artifacts(project_id).await?;
        Ok(artifact::current_content(
            records.iter().filter(|a| order.contains(&a.phase)),
            &order,
        ))
    }

    /// Current content of the artifacts a single phase produced.
    pub async fn phase_artifacts(
        &self,
        project_id: &str,
        phase: &str,
    ) -> Result<ArtifactMap, EngineError> {
        let order = vec![phase.to_string()];
        let records = self.stores.artifacts.list_artifacts(project_id).await?;
        Ok(artifact::current_content(
            records.iter().filter(|a| a.phase == phase),
            &order,
        ))
    }

    // =========================================
    // Advance
    // =========================================

    /// Move past the current stage.
    ///
    /// Every member of the stage must have its blocking gates satisfied and
    /// its required artifacts present; otherwise nothing is mutated.
    pub async fn advance(&self, project_id: &str) -> Result<AdvanceOutcome, EngineError> {
        let mut project = self.get_project(project_id).await?;
        let current = project.current_phase.clone();
        let stage = self
            .registry
            .stage_of(&current)
            .ok_or_else(|| EngineError::UnknownPhase {
                phase: current.clone(),
            })?;
        let next = self
            .registry
            .next_stage_after(&current)
            .ok_or_else(|| EngineError::PipelineComplete {
                phase: current.clone(),
            })?;

        for member in stage.phases() {
            let blocked = self.gates.unsatisfied_blocking_gates(project_id, &member).await?;
            if !blocked.is_empty() {
                warn!(project = project_id, phase = %member, gates = ?blocked, "Advance blocked by gate");
                return Err(EngineError::GateBlocked {
                    phase: member,
                    gates: blocked,
                });
            }
            self.ensure_required_artifacts(project_id, &member).await?;
        }

        let completed: Vec<String> = stage
            .phases()
            .into_iter()
            .filter(|p| !project.has_completed(p))
            .collect();
        project.phases_completed.extend(completed.iter().cloned());
        project.current_phase = next.lead_phase().to_string();
        let saved = self.stores.projects.save_project(&project).await?;

        info!(project = project_id, from = %current, to = %saved.current_phase, "Advanced");
        self.record(
            project_id,
            AuditKind::Advanced {
                from: current.clone(),
                to: saved.current_phase.clone(),
            },
        );
        Ok(AdvanceOutcome {
            previous_phase: current,
            new_phase: saved.current_phase,
            completed,
        })
    }

    async fn ensure_required_artifacts(&self, project_id: &str, phase: &str) -> Result<(), EngineError> {
        let Some(spec) = self.registry.phase(phase) else {
            return Err(EngineError::UnknownPhase {
                phase: phase.to_string(),
            });
        };
        if spec.required_artifacts.is_empty() {
            return Ok(());
        }
        let present = self.phase_artifacts(project_id, phase).await?;
        let missing: Vec<String> = spec
            .required_artifacts
            .iter()
            .filter(|name| !present.contains_key(*name))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::MissingArtifacts {
                phase: phase.to_string(),
                missing,
            })
        }
    }

    // =========================================
    // Gates
    // =========================================

    pub async fn approve_gate(&self, req: ApproveRequest) -> Result<ApprovalGateRecord, EngineError> {
        let project_id = req.project_id.clone();
        let record = self.gates.approve_gate(req).await?;
        self.record(
            &project_id,
            AuditKind::GateApproved {
                gate: record.gate.clone(),
                approver: record.decided_by.clone().unwrap_or_default(),
                status: record.status.to_string(),
                score: record.score,
            },
        );
        Ok(record)
    }

    pub async fn reject_gate(&self, req: RejectRequest) -> Result<ApprovalGateRecord, EngineError> {
        let project_id = req.project_id.clone();
        let reason = req.reason.clone();
        let record = self.gates.reject_gate(req).await?;
        self.record(
            &project_id,
            AuditKind::GateRejected {
                gate: record.gate.clone(),
                rejected_by: record.decided_by.clone().unwrap_or_default(),
                reason,
            },
        );
        Ok(record)
    }

    // =========================================
    // Rollback
    // =========================================

    pub async fn rollback(&self, req: RollbackRequest) -> Result<RollbackOutcome, EngineError> {
        let project_id = req.project_id.clone();
        let outcome = self.rollback.rollback_to_phase(req).await?;
        self.record(
            &project_id,
            AuditKind::RolledBack {
                target: outcome.target_phase.clone(),
                snapshot_id: outcome.snapshot_id.clone(),
                removed_phases: outcome.removed_phases.clone(),
            },
        );
        Ok(outcome)
    }

    pub async fn rollback_preview(
        &self,
        project_id: &str,
        target_phase: &str,
    ) -> Result<RollbackPreview, EngineError> {
        Ok(self.rollback.preview(project_id, target_phase).await?)
    }

    pub async fn restore_snapshot(
        &self,
        project_id: &str,
        snapshot_id: &str,
    ) -> Result<RestoreOutcome, EngineError> {
        let outcome = self.rollback.restore_snapshot(project_id, snapshot_id).await?;
        self.record(
            project_id,
            AuditKind::SnapshotRestored {
                snapshot_id: snapshot_id.to_string(),
                restored: outcome.restored,
            },
        );
        Ok(outcome)
    }

    pub async fn list_snapshots(&self, project_id: &str) -> Result<Vec<Snapshot>, EngineError> {
        Ok(self.rollback.list_snapshots(project_id).await?)
    }

    // =========================================
    // Clarifications
    // =========================================

    pub async fn add_clarification(
        &self,
        project_id: &str,
        category: &str,
        question: &str,
        options: Vec<String>,
    ) -> Result<ClarificationQuestion, EngineError> {
        if question.trim().is_empty() {
            return Err(EngineError::Clarification {
                reason: "question text must not be empty".to_string(),
            });
        }
        let mut project = self.get_project(project_id).await?;
        let id = clarification::next_question_id(&project.clarifications);
        let added = ClarificationQuestion::new(&id, category, question, options);
        project.clarifications.push(added.clone());
        self.stores.projects.save_project(&project).await?;
        Ok(added)
    }

    pub async fn answer_clarification(
        &self,
        project_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<(), EngineError> {
        let mut project = self.get_project(project_id).await?;
        clarification::answer_question(&mut project.clarifications, question_id, answer).map_err(
            |e| EngineError::Clarification {
                reason: e.to_string(),
            },
        )?;
        self.stores.projects.save_project(&project).await?;
        Ok(())
    }

    /// Resolve every question `mode` allows the AI to answer; returns the count.
    pub async fn resolve_clarifications(
        &self,
        project_id: &str,
        mode: ClarificationMode,
    ) -> Result<usize, EngineError> {
        let project = self.get_project(project_id).await?;
        let (_, resolved) = self.auto_resolve(project, mode).await?;
        Ok(resolved)
    }

    async fn auto_resolve(
        &self,
        mut project: Project,
        mode: ClarificationMode,
    ) -> Result<(Project, usize), EngineError> {
        let resolved = clarification::auto_resolve(&mut project.clarifications, mode);
        if resolved == 0 {
            return Ok((project, 0));
        }
        let saved = self.stores.projects.save_project(&project).await?;
        info!(project = %saved.id, %mode, resolved, "Auto-resolved clarifications");
        self.record(
            &saved.id,
            AuditKind::ClarificationsResolved {
                mode: mode.to_string(),
                count: resolved,
            },
        );
        Ok((saved, resolved))
    }

    // =========================================
    // Helpers
    // =========================================

    /// The stage `phase` belongs to, or `UnknownPhase`.
    fn stage_of(&self, phase: &str) -> Result<Stage, EngineError> {
        self.registry
            .stage_of(phase)
            .ok_or_else(|| EngineError::UnknownPhase {
                phase: phase.to_string(),
            })
    }

    /// Audit failures are logged and never fail the operation.
    fn record(&self, project_id: &str, kind: AuditKind) {
        if let Some(ref audit) = self.audit
            && let Err(e) = audit.record(&AuditEvent::new(project_id, kind))
        {
            warn!(project = project_id, error = %e, "Failed to write audit event");
        }
    }
}
