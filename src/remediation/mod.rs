//! Failure classification and remediation selection.
//!
//! `classify_failure` turns a free-text error into a `FailureKind`;
//! `RemediationPlanner::strategy_for` maps (kind, phase) to the agent that
//! should re-run, the phase it should re-run, and what it should be told.

pub mod classifier;

pub use classifier::{FailureClassification, FailureKind, classify_failure};

use crate::phase::PhaseRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_to_rerun: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_phase: Option<String>,
    pub additional_instructions: String,
    pub requires_manual_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RemediationStrategy {
    fn rerun(agent: &str, target_phase: String, instructions: &str) -> Self {
        Self {
            agent_to_rerun: Some(agent.to_string()),
            target_phase: Some(target_phase),
            additional_instructions: instructions.to_string(),
            requires_manual_review: false,
            reason: None,
        }
    }

    fn manual(phase: &str, reason: &str) -> Self {
        Self {
            agent_to_rerun: None,
            target_phase: Some(phase.to_string()),
            additional_instructions: String::new(),
            requires_manual_review: true,
            reason: Some(reason.to_string()),
        }
    }
}

/// A classification paired with the remediation chosen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    pub classification: FailureClassification,
    pub strategy: RemediationStrategy,
}

pub struct RemediationPlanner {
    registry: Arc<PhaseRegistry>,
}

impl RemediationPlanner {
    pub fn new(registry: Arc<PhaseRegistry>) -> Self {
        Self { registry }
    }

    /// Classify `message` and pick a strategy in one step.
    pub fn plan(&self, phase: &str, message: &str) -> Remediation {
        let classification = classify_failure(phase, message);
        let strategy = self.strategy_for(classification.kind, phase);
        Remediation {
            classification,
            strategy,
        }
    }

    pub fn strategy_for(&self, kind: FailureKind, phase: &str) -> RemediationStrategy {
        let owner = self
            .registry
            .phase(phase)
            .map(|p| p.agent.clone())
            .unwrap_or_default();

        match kind {
            FailureKind::MissingRequirementMapping => RemediationStrategy::rerun(
                "scrummaster",
                self.phase_for_agent("scrummaster", phase),
                "Run a gap analysis between the brief, the PRD and the task breakdown; \
                 map every requirement to at least one epic or task.",
            ),
            FailureKind::PersonaMismatch => RemediationStrategy::rerun(
                "pm",
                self.phase_for_agent("pm", phase),
                "Restore persona consistency: use the personas defined in the PRD \
                 everywhere and remove any that are not backed by the brief.",
            ),
            FailureKind::ApiDataModelGap => RemediationStrategy::rerun(
                "architect",
                self.phase_for_agent("architect", phase),
                "Synchronize the data model and the API spec so every endpoint uses \
                 defined entities and every entity is reachable.",
            ),
            FailureKind::StructuralInconsistency => {
                let is_design = self
                    .registry
                    .phase(phase)
                    .is_some_and(|p| p.is_design_phase());
                let agent = if is_design { "designer" } else { owner.as_str() };
                if agent.is_empty() {
                    return RemediationStrategy::manual(phase, "No agent owns the failing phase");
                }
                RemediationStrategy::rerun(
                    agent,
                    self.phase_for_agent(agent, phase),
                    "Resolve the structural inconsistencies so the artifact agrees with \
                     its upstream documents.",
                )
            }
            FailureKind::FormatValidationError => {
                if owner.is_empty() {
                    return RemediationStrategy::manual(phase, "No agent owns the failing phase");
                }
                RemediationStrategy::rerun(
                    &owner,
                    phase.to_string(),
                    "Fix formatting: every required artifact must be present, markdown \
                     needs headings and JSON must parse with the required keys.",
                )
            }
            FailureKind::ConstitutionalViolation => RemediationStrategy::manual(
                phase,
                "Constitutional violations need a human decision",
            ),
            FailureKind::Unknown => {
                RemediationStrategy::manual(phase, "Failure could not be classified")
            }
        }
    }

    /// The phase `agent` should re-run for a failure in `failing_phase`: its
    /// latest phase at or before the failing one, else its first phase, else
    /// the failing phase itself.
    fn phase_for_agent(&self, agent: &str, failing_phase: &str) -> String {
        let limit = self
            .registry
            .position(failing_phase)
            .unwrap_or(usize::MAX);
        let phases = self.registry.phases();

        phases
            .iter()
            .enumerate()
            .filter(|(i, p)| *i <= limit && p.agent == agent)
            .map(|(_, p)| p)
            .next_back()
            .or_else(|| phases.iter().find(|p| p.agent == agent))
            .map(|p| p.name.clone())
            .unwrap_or_else(|| failing_phase.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> RemediationPlanner {
        RemediationPlanner::new(Arc::new(PhaseRegistry::builtin()))
    }

    #[test]
    fn test_missing_requirement_goes_to_scrummaster() {
        let s = planner().strategy_for(FailureKind::MissingRequirementMapping, "VALIDATE");
        assert_eq!(s.agent_to_rerun.as_deref(), Some("scrummaster"));
        assert_eq!(s.target_phase.as_deref(), Some("SOLUTIONING"));
        assert!(s.additional_instructions.contains("gap analysis"));
        assert!(!s.requires_manual_review);
    }

    #[test]
    fn test_missing_requirement_before_solutioning_targets_first_scrummaster_phase() {
        let s = planner().strategy_for(FailureKind::MissingRequirementMapping, "SPEC_PM");
        assert_eq!(s.target_phase.as_deref(), Some("SOLUTIONING"));
    }

    #[test]
    fn test_persona_mismatch_goes_to_pm() {
        let s = planner().strategy_for(FailureKind::PersonaMismatch, "SPEC_DESIGN_COMPONENTS");
        assert_eq!(s.agent_to_rerun.as_deref(), Some("pm"));
        assert_eq!(s.target_phase.as_deref(), Some("SPEC_PM"));
        assert!(s.additional_instructions.contains("persona consistency"));
    }

    #[test]
    fn test_api_gap_goes_to_architect() {
        let s = planner().strategy_for(FailureKind::ApiDataModelGap, "SOLUTIONING");
        assert_eq!(s.agent_to_rerun.as_deref(), Some("architect"));
        assert_eq!(s.target_phase.as_deref(), Some("SPEC_ARCHITECT"));
        assert!(s.additional_instructions.to_lowercase().contains("synchronize"));
    }

    #[test]
    fn test_structural_in_design_phase_goes_to_designer() {
        let s = planner().strategy_for(
            FailureKind::StructuralInconsistency,
            "SPEC_DESIGN_COMPONENTS",
        );
        assert_eq!(s.agent_to_rerun.as_deref(), Some("designer"));
        assert_eq!(s.target_phase.as_deref(), Some("SPEC_DESIGN_COMPONENTS"));

        let s = planner().strategy_for(FailureKind::StructuralInconsistency, "DEPENDENCIES");
        assert_eq!(s.agent_to_rerun.as_deref(), Some("devops"));
    }

    #[test]
    fn test_format_error_reruns_owner() {
        let s = planner().strategy_for(FailureKind::FormatValidationError, "STACK_SELECTION");
        assert_eq!(s.agent_to_rerun.as_deref(), Some("architect"));
        assert_eq!(s.target_phase.as_deref(), Some("STACK_SELECTION"));
        assert!(s.additional_instructions.to_lowercase().contains("fix formatting"));
    }

    #[test]
    fn test_manual_review_kinds() {
        for kind in [FailureKind::ConstitutionalViolation, FailureKind::Unknown] {
            let s = planner().strategy_for(kind, "STACK_SELECTION");
            assert!(s.requires_manual_review);
            assert!(s.agent_to_rerun.is_none());
            assert!(s.reason.is_some());
        }
    }

    #[test]
    fn test_plan_combines_classification_and_strategy() {
        let remediation = planner().plan(
            "SPEC_PM",
            "PRD.md is missing requirements for user authentication mentioned in project-brief.md",
        );
        assert_eq!(
            remediation.classification.kind,
            FailureKind::MissingRequirementMapping
        );
        assert_eq!(
            remediation.strategy.agent_to_rerun.as_deref(),
            Some("scrummaster")
        );
    }

    #[test]
    fn test_unknown_phase_format_error_needs_manual_review() {
        let s = planner().strategy_for(FailureKind::FormatValidationError, "NOPE");
        assert!(s.requires_manual_review);
    }
}
