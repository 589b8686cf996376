//! Phase execution: single attempts, parallel groups and the full
//! generate → validate → review → regenerate loop.

use super::{Engine, ParallelGroupResults, PhaseExecutionResult, PhaseOutcome, PhaseParams};
use crate::artifact::ArtifactMap;
use crate::audit::AuditKind;
use crate::checker::{CheckContext, CheckerStatus, build_regeneration_prompt};
use crate::errors::{EngineError, StoreError};
use crate::phase::{DONE_PHASE, PhaseGroup, PhaseSpec, Stage};
use crate::project::Project;
use crate::remediation::Remediation;
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, warn};

/// Where the regeneration loop left a phase, before anything is persisted.
enum Settled {
    Approved(PhaseExecutionResult),
    Escalated(PhaseExecutionResult, String),
    Failed(PhaseExecutionResult, Remediation),
}

impl Engine {
    /// One generation attempt: executor, inline validation, then critic review.
    ///
    /// Executor and validation failures come back as `success = false`; the
    /// only errors are an unknown phase or an unreadable store.
    pub async fn run_phase_agent(
        &self,
        project: &Project,
        phase: &str,
    ) -> Result<PhaseExecutionResult, EngineError> {
        let spec = self.phase_spec(phase)?;
        let accumulated = self.accumulated_artifacts(&project.id, phase).await?;
        Ok(self.attempt(&project.id, spec, &accumulated, None, 1).await)
    }

    /// Run every member of `group` concurrently and collect one result per
    /// phase, whether or not its siblings failed.
    ///
    /// The group is validated before any executor call; an unregistered
    /// member fails the whole request with no side effects.
    pub async fn execute_parallel_group(
        &self,
        project_id: &str,
        group: &PhaseGroup,
        seed: Option<ArtifactMap>,
    ) -> Result<ParallelGroupResults, EngineError> {
        let specs = self.validate_group(group)?;
        let accumulated = match seed {
            Some(seed) => seed,
            None => self.accumulated_artifacts(project_id, &specs[0].name).await?,
        };

        info!(
            project = project_id,
            group = %group.name,
            phases = specs.len(),
            "Dispatching parallel group"
        );
        let settled = join_all(
            specs
                .iter()
                .map(|spec| self.attempt(project_id, spec, &accumulated, None, 1)),
        )
        .await;

        let results = settled.into_iter().map(|r| (r.phase.clone(), r)).collect();
        Ok(ParallelGroupResults {
            group: group.name.clone(),
            order: group.phases.clone(),
            results,
        })
    }

    /// Run one phase of the active stage to a verdict, persisting on approval.
    pub async fn run_phase(&self, project_id: &str, phase: &str) -> Result<PhaseOutcome, EngineError> {
        let spec = self.phase_spec(phase)?;
        let project = self.prepare_run(project_id, phase).await?;
        let accumulated = self.accumulated_artifacts(project_id, phase).await?;

        let settled = self.drive(project_id, spec, &accumulated, None).await;
        if matches!(settled, Settled::Approved(_)) {
            self.claim(&project, phase).await?;
        }
        self.conclude(project_id, settled).await
    }

    /// Run the project's current stage; groups run their members concurrently.
    pub async fn run_current(&self, project_id: &str) -> Result<Vec<PhaseOutcome>, EngineError> {
        let project = self.get_project(project_id).await?;
        match self.stage_of(&project.current_phase)? {
            Stage::Sequential(phase) => Ok(vec![self.run_phase(project_id, &phase).await?]),
            Stage::Parallel(group) => self.run_group(project_id, &group).await,
        }
    }

    async fn run_group(
        &self,
        project_id: &str,
        group: &PhaseGroup,
    ) -> Result<Vec<PhaseOutcome>, EngineError> {
        let specs = self.validate_group(group)?;
        let lead = specs[0].name.clone();
        let project = self.prepare_run(project_id, &lead).await?;
        let accumulated = self.accumulated_artifacts(project_id, &lead).await?;

        let mut first = self
            .execute_parallel_group(project_id, group, Some(accumulated.clone()))
            .await?;
        let drives: Vec<_> = specs
            .iter()
            .map(|spec| {
                let initial = first.take(&spec.name);
                self.drive(project_id, spec, &accumulated, initial)
            })
            .collect();
        let settled = join_all(drives).await;

        if settled.iter().any(|s| matches!(s, Settled::Approved(_))) {
            self.claim(&project, &group.name).await?;
        }
        let mut outcomes = Vec::with_capacity(settled.len());
        for s in settled {
            outcomes.push(self.conclude(project_id, s).await?);
        }
        Ok(outcomes)
    }

    // =========================================
    // Internals
    // =========================================

    fn phase_spec(&self, phase: &str) -> Result<&PhaseSpec, EngineError> {
        self.registry
            .phase(phase)
            .ok_or_else(|| EngineError::UnknownPhase {
                phase: phase.to_string(),
            })
    }

    fn validate_group(&self, group: &PhaseGroup) -> Result<Vec<&PhaseSpec>, EngineError> {
        if group.phases.is_empty() {
            return Err(EngineError::InvalidGroup {
                group: group.name.clone(),
                reason: "group has no phases".to_string(),
            });
        }

        let unknown: Vec<String> = group
            .phases
            .iter()
            .filter(|p| !self.registry.contains(p))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(EngineError::UnknownGroupMembers {
                group: group.name.clone(),
                phases: unknown,
            });
        }

        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(group.phases.len());
        for name in &group.phases {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::InvalidGroup {
                    group: group.name.clone(),
                    reason: format!("phase {name} is listed more than once"),
                });
            }
            specs.push(self.phase_spec(name)?);
        }
        Ok(specs)
    }

    /// Preconditions for generating `phase`; returns the project as of now.
    async fn prepare_run(&self, project_id: &str, phase: &str) -> Result<Project, EngineError> {
        if phase == DONE_PHASE {
            return Err(EngineError::PipelineComplete {
                phase: phase.to_string(),
            });
        }
        let project = self.get_project(project_id).await?;
        if !self.stage_of(&project.current_phase)?.contains(phase) {
            return Err(EngineError::PhaseNotActive {
                phase: phase.to_string(),
                current: project.current_phase,
            });
        }

        let (project, _) = self.auto_resolve(project, self.clarification_mode).await?;
        let pending = project.pending_clarifications();
        if pending > 0 {
            return Err(EngineError::ClarificationPending { count: pending });
        }

        for earlier in self.registry.phases_before_stage_of(phase) {
            let blocked = self
                .gates
                .unsatisfied_blocking_gates(project_id, &earlier.name)
                .await?;
            if !blocked.is_empty() {
                return Err(EngineError::GateBlocked {
                    phase: earlier.name.clone(),
                    gates: blocked,
                });
            }
        }
        Ok(project)
    }

    async fn attempt(
        &self,
        project_id: &str,
        spec: &PhaseSpec,
        accumulated: &ArtifactMap,
        instructions: Option<String>,
        attempt: u32,
    ) -> PhaseExecutionResult {
        let started = Instant::now();
        let phase = spec.name.as_str();
        let params = PhaseParams {
            phase: spec.name.clone(),
            agent: spec.agent.clone(),
            required_artifacts: spec.required_artifacts.clone(),
            description: spec.description.clone(),
            additional_instructions: instructions,
            attempt,
        };

        info!(project = project_id, phase, agent = %spec.agent, attempt, "Running phase agent");
        let artifacts = match self.executor.execute(project_id, accumulated, &params).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!(project = project_id, phase, attempt, error = %e, "Agent execution failed");
                return PhaseExecutionResult::failed(
                    phase,
                    format!("{e:#}"),
                    started.elapsed(),
                    attempt,
                );
            }
        };

        let validation = self.validator.validate(phase, &artifacts);
        if !validation.can_proceed() {
            let summary = validation.error_summary();
            warn!(
                project = project_id,
                phase,
                errors = validation.errors.len(),
                "Inline validation failed"
            );
            return PhaseExecutionResult {
                phase: phase.to_string(),
                success: false,
                artifacts,
                error: Some(summary),
                duration: started.elapsed(),
                validation,
                review: None,
                attempts: attempt,
            };
        }

        let context = CheckContext {
            project_id: project_id.to_string(),
            attempt,
            upstream_artifacts: accumulated.keys().cloned().collect(),
        };
        let review = self.checker.execute_check(phase, &artifacts, &context).await;

        PhaseExecutionResult {
            phase: phase.to_string(),
            success: true,
            artifacts,
            error: None,
            duration: started.elapsed(),
            validation,
            review: Some(review),
            attempts: attempt,
        }
    }

    /// Loop attempts until the critic approves, escalates, or the
    /// regeneration budget runs out. `first` is an attempt already made.
    async fn drive(
        &self,
        project_id: &str,
        spec: &PhaseSpec,
        accumulated: &ArtifactMap,
        first: Option<PhaseExecutionResult>,
    ) -> Settled {
        let phase = spec.name.as_str();
        let max_regenerations = self
            .checker
            .config_for(phase)
            .map(|c| c.max_regenerations)
            .unwrap_or(0);

        let mut result = match first {
            Some(result) => result,
            None => self.attempt(project_id, spec, accumulated, None, 1).await,
        };
        let mut regenerations = 0;

        loop {
            if !result.success {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Phase failed without an error message".to_string());
                let remediation = self.remediation.plan(phase, &message);
                return Settled::Failed(result, remediation);
            }

            let Some(review) = result.review.clone() else {
                return Settled::Approved(result);
            };

            match review.status {
                CheckerStatus::Approved => return Settled::Approved(result),
                CheckerStatus::Escalate => return Settled::Escalated(result, review.summary),
                CheckerStatus::Regenerate if regenerations >= max_regenerations => {
                    let reason = format!(
                        "Regeneration limit of {} reached: {}",
                        max_regenerations, review.summary
                    );
                    if let Some(ref mut r) = result.review {
                        r.status = CheckerStatus::Escalate;
                        r.summary = reason.clone();
                    }
                    return Settled::Escalated(result, reason);
                }
                CheckerStatus::Regenerate => {
                    regenerations += 1;
                    info!(
                        project = project_id,
                        phase,
                        regeneration = regenerations,
                        max = max_regenerations,
                        feedback = review.feedback.len(),
                        "Regenerating with critic feedback"
                    );
                    let instructions = build_regeneration_prompt(&spec.description, &review.feedback);
                    result = self
                        .attempt(project_id, spec, accumulated, Some(instructions), regenerations + 1)
                        .await;
                }
            }
        }
    }

    /// Fail if the project moved on while we were generating; otherwise bump
    /// its version so a concurrent writer sees the change.
    async fn claim(&self, project: &Project, label: &str) -> Result<(), EngineError> {
        let conflict = || EngineError::ConcurrentModification {
            project: project.id.clone(),
            phase: label.to_string(),
        };

        let fresh = self.get_project(&project.id).await?;
        if fresh.version != project.version || fresh.current_phase != project.current_phase {
            warn!(
                project = %project.id,
                phase = label,
                expected = project.version,
                found = fresh.version,
                "Project changed during run; discarding results"
            );
            return Err(conflict());
        }
        match self.stores.projects.save_project(&fresh).await {
            Ok(_) => Ok(()),
            Err(StoreError::VersionConflict { .. }) => Err(conflict()),
            Err(e) => Err(e.into()),
        }
    }

    async fn conclude(&self, project_id: &str, settled: Settled) -> Result<PhaseOutcome, EngineError> {
        match settled {
            Settled::Approved(result) => {
                let version = self
                    .stores
                    .artifacts
                    .put_artifacts(project_id, &result.phase, &result.artifacts)
                    .await?;
                let confidence = result.review.as_ref().map(|r| r.confidence).unwrap_or(1.0);
                info!(
                    project = project_id,
                    phase = %result.phase,
                    version,
                    attempts = result.attempts,
                    "Phase completed"
                );
                self.record(
                    project_id,
                    AuditKind::PhaseCompleted {
                        phase: result.phase.clone(),
                        version,
                        attempts: result.attempts,
                        confidence,
                    },
                );
                Ok(PhaseOutcome::Completed { result, version })
            }
            Settled::Escalated(result, reason) => {
                warn!(project = project_id, phase = %result.phase, %reason, "Phase escalated");
                self.record(
                    project_id,
                    AuditKind::PhaseEscalated {
                        phase: result.phase.clone(),
                        reason: reason.clone(),
                    },
                );
                Ok(PhaseOutcome::Escalated { result, reason })
            }
            Settled::Failed(result, remediation) => {
                warn!(
                    project = project_id,
                    phase = %result.phase,
                    kind = %remediation.classification.kind,
                    manual = remediation.strategy.requires_manual_review,
                    "Phase failed"
                );
                self.record(
                    project_id,
                    AuditKind::PhaseFailed {
                        phase: result.phase.clone(),
                        error: result.error.clone().unwrap_or_default(),
                        failure_kind: remediation.classification.kind.to_string(),
                    },
                );
                Ok(PhaseOutcome::Failed {
                    result,
                    remediation,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AgentExecutor;
    use crate::phase::PhaseRegistry;
    use crate::store::Stores;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Produces valid-looking artifacts for every required name.
    struct EchoExecutor {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentExecutor for EchoExecutor {
        async fn execute(
            &self,
            _project_id: &str,
            _accumulated: &ArtifactMap,
            params: &PhaseParams,
        ) -> Result<ArtifactMap> {
            self.calls.lock().unwrap().push(params.phase.clone());
            if params.phase == "SPEC_DESIGN_TOKENS" {
                bail!("designer unavailable");
            }
            Ok(params
                .required_artifacts
                .iter()
                .map(|name| (name.clone(), format!("# {name}\n\nGenerated.")))
                .collect())
        }
    }

    fn engine() -> (Engine, Arc<EchoExecutor>) {
        let executor = Arc::new(EchoExecutor {
            calls: Mutex::new(Vec::new()),
        });
        let registry = Arc::new(PhaseRegistry::builtin());
        // Only presence checks, so short generated content passes.
        let mut validator = crate::validation::InlineValidator::new();
        for phase in registry.phases() {
            validator.register(
                &phase.name,
                crate::validation::validators::required_artifacts(&phase.required_artifacts),
            );
        }
        let engine = Engine::new(registry, executor.clone(), Stores::memory()).with_validator(validator);
        (engine, executor)
    }

    #[tokio::test]
    async fn test_group_validation_rejects_duplicates() {
        let (engine, executor) = engine();
        engine.create_project("acme", "Acme").await.unwrap();
        let group = PhaseGroup::new("specs", &["SPEC_ARCHITECT", "SPEC_ARCHITECT"]);
        let err = engine
            .execute_parallel_group("acme", &group, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidGroup { .. }));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_group_is_invalid() {
        let (engine, _) = engine();
        let group = PhaseGroup::new("nothing", &[]);
        let err = engine
            .execute_parallel_group("acme", &group, Some(ArtifactMap::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidGroup { .. }));
    }

    #[tokio::test]
    async fn test_run_phase_rejects_inactive_phase() {
        let (engine, executor) = engine();
        engine.create_project("acme", "Acme").await.unwrap();
        let err = engine.run_phase("acme", "SPEC_PM").await.unwrap_err();
        match err {
            EngineError::PhaseNotActive { phase, current } => {
                assert_eq!(phase, "SPEC_PM");
                assert_eq!(current, "ANALYSIS");
            }
            other => panic!("Expected PhaseNotActive, got {other:?}"),
        }
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_current_sequential_persists_version() {
        let (engine, _) = engine();
        engine.create_project("acme", "Acme").await.unwrap();
        let outcomes = engine.run_current("acme").await.unwrap();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            PhaseOutcome::Completed { version, .. } => assert_eq!(*version, 1),
            other => panic!("Expected completion, got {}", other.label()),
        }
        let artifacts = engine.phase_artifacts("acme", "ANALYSIS").await.unwrap();
        assert!(artifacts.contains_key("project-brief.md"));
    }

    #[tokio::test]
    async fn test_done_phase_cannot_run() {
        let (engine, _) = engine();
        engine.create_project("acme", "Acme").await.unwrap();
        let err = engine.run_phase("acme", DONE_PHASE).await.unwrap_err();
        assert!(matches!(err, EngineError::PipelineComplete { .. }));
    }
}
