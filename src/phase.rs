//! Phase registry: the immutable pipeline definition the engine runs against.
//!
//! This module provides:
//! - `PhaseSpec` describing a single phase (owning agent, required artifacts, group)
//! - `GateDefinition` describing an approval gate attached to a phase
//! - `PhaseRegistry` with validated ordering, stage lookup and gate lookup
//! - `RegistryFile` for the `phases.json` format and the built-in registry fallback
//!
//! The registry is loaded once and shared by reference (`Arc<PhaseRegistry>`);
//! nothing mutates it after construction.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Name of the terminal phase in the built-in registry.
pub const DONE_PHASE: &str = "DONE";

/// A single pipeline phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSpec {
    /// Unique phase name (e.g. "SPEC_PM")
    pub name: String,
    /// Parallel group this phase belongs to; `None` for sequential phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Agent capability that owns the phase (e.g. "pm", "architect")
    pub agent: String,
    /// Artifact filenames the phase must produce
    #[serde(default)]
    pub required_artifacts: Vec<String>,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

impl PhaseSpec {
    /// Create a sequential phase.
    pub fn new(name: &str, agent: &str, required_artifacts: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            group: None,
            agent: agent.to_string(),
            required_artifacts: required_artifacts.iter().map(|s| s.to_string()).collect(),
            description: String::new(),
        }
    }

    /// Place this phase into a named parallel group.
    pub fn in_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Design phases are owned by the designer or carry DESIGN in their name.
    pub fn is_design_phase(&self) -> bool {
        self.agent == "designer" || self.name.contains("DESIGN")
    }
}

/// An approval gate attached to a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateDefinition {
    pub name: String,
    /// Phase the gate guards progression from
    pub phase: String,
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    /// Role expected to sign off (e.g. "architect")
    pub stakeholder: String,
    /// Score (0-100) at or above which an approval is recorded as auto-approved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approve_threshold: Option<u32>,
}

fn default_blocking() -> bool {
    true
}

impl GateDefinition {
    pub fn blocking(name: &str, phase: &str, stakeholder: &str) -> Self {
        Self {
            name: name.to_string(),
            phase: phase.to_string(),
            blocking: true,
            stakeholder: stakeholder.to_string(),
            auto_approve_threshold: None,
        }
    }

    pub fn advisory(name: &str, phase: &str, stakeholder: &str) -> Self {
        Self {
            blocking: false,
            ..Self::blocking(name, phase, stakeholder)
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.auto_approve_threshold = Some(threshold);
        self
    }
}

/// A named set of phases executed concurrently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseGroup {
    pub name: String,
    pub phases: Vec<String>,
}

impl PhaseGroup {
    pub fn new(name: &str, phases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            phases: phases.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One step of the pipeline: a lone phase or a parallel group.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Sequential(String),
    Parallel(PhaseGroup),
}

impl Stage {
    /// Phase names in this stage, in registry order.
    pub fn phases(&self) -> Vec<String> {
        match self {
            Stage::Sequential(name) => vec![name.clone()],
            Stage::Parallel(group) => group.phases.clone(),
        }
    }

    /// The phase a project points at while in this stage.
    pub fn lead_phase(&self) -> &str {
        match self {
            Stage::Sequential(name) => name,
            Stage::Parallel(group) => group.phases.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn contains(&self, phase: &str) -> bool {
        match self {
            Stage::Sequential(name) => name == phase,
            Stage::Parallel(group) => group.phases.iter().any(|p| p == phase),
        }
    }
}

/// Gate settings that configuration may override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GateOverride {
    #[serde(default)]
    pub blocking: Option<bool>,
    #[serde(default)]
    pub auto_approve_threshold: Option<u32>,
}

/// On-disk registry format (`.specforge/phases.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFile {
    pub phases: Vec<PhaseSpec>,
    #[serde(default)]
    pub gates: Vec<GateDefinition>,
}

impl RegistryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        let file: RegistryFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases JSON: {}", path.display()))?;

        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;

        Ok(())
    }
}

/// Validated, ordered phase and gate definitions.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: Vec<PhaseSpec>,
    gates: Vec<GateDefinition>,
    index: HashMap<String, usize>,
}

impl PhaseRegistry {
    /// Build a registry, rejecting duplicate names, dangling gates and
    /// non-contiguous parallel groups.
    pub fn new(phases: Vec<PhaseSpec>, gates: Vec<GateDefinition>) -> Result<Self> {
        if phases.is_empty() {
            bail!("Phase registry must contain at least one phase");
        }

        let mut index = HashMap::new();
        for (i, phase) in phases.iter().enumerate() {
            if index.insert(phase.name.clone(), i).is_some() {
                bail!("Duplicate phase name '{}' in registry", phase.name);
            }
        }

        let mut gate_names = HashSet::new();
        for gate in &gates {
            if !gate_names.insert(gate.name.as_str()) {
                bail!("Duplicate gate name '{}' in registry", gate.name);
            }
            if !index.contains_key(&gate.phase) {
                bail!(
                    "Gate '{}' references unknown phase '{}'",
                    gate.name,
                    gate.phase
                );
            }
            if let Some(threshold) = gate.auto_approve_threshold
                && threshold > 100
            {
                bail!(
                    "Gate '{}' has auto-approve threshold {} above 100",
                    gate.name,
                    threshold
                );
            }
        }

        // A group must occupy one contiguous run of phases.
        let mut closed_groups: HashSet<&str> = HashSet::new();
        let mut previous: Option<&str> = None;
        for phase in &phases {
            let group = phase.group.as_deref();
            if group != previous {
                if let Some(prev) = previous {
                    closed_groups.insert(prev);
                }
                if let Some(g) = group
                    && closed_groups.contains(g)
                {
                    bail!("Parallel group '{}' is not contiguous in the registry", g);
                }
            }
            previous = group;
        }

        Ok(Self {
            phases,
            gates,
            index,
        })
    }

    /// The built-in pipeline.
    pub fn builtin() -> Self {
        let phases = vec![
            PhaseSpec::new(
                "ANALYSIS",
                "analyst",
                &["project-brief.md", "project-classification.json"],
            )
            .with_description("Analyse the idea and classify the project"),
            PhaseSpec::new("STACK_SELECTION", "architect", &["stack-analysis.md", "stack.json"])
                .with_description("Propose and justify a technology stack"),
            PhaseSpec::new("SPEC_PM", "pm", &["PRD.md"])
                .with_description("Write the product requirements document"),
            PhaseSpec::new("SPEC_ARCHITECT", "architect", &["data-model.md", "api-spec.json"])
                .in_group("specs")
                .with_description("Specify the data model and API"),
            PhaseSpec::new("SPEC_DESIGN_TOKENS", "designer", &["design-tokens.md"])
                .in_group("specs")
                .with_description("Define design tokens"),
            PhaseSpec::new("SPEC_DESIGN_COMPONENTS", "designer", &["component-inventory.md"])
                .with_description("Inventory UI components and journeys"),
            PhaseSpec::new("DEPENDENCIES", "devops", &["DEPENDENCIES.md"])
                .with_description("Propose third-party dependencies"),
            PhaseSpec::new("SOLUTIONING", "scrummaster", &["epics.md", "tasks.md"])
                .with_description("Break the specs into epics and tasks"),
            PhaseSpec::new("VALIDATE", "validator", &["validation-report.md"])
                .with_description("Cross-check every artifact for consistency"),
            PhaseSpec::new(DONE_PHASE, "orchestrator", &[])
                .with_description("Pipeline complete"),
        ];

        let gates = vec![
            GateDefinition::blocking("stack_approved", "STACK_SELECTION", "architect"),
            GateDefinition::blocking("prd_approved", "SPEC_PM", "product_owner").with_threshold(90),
            GateDefinition::blocking("architecture_approved", "SPEC_ARCHITECT", "architect")
                .with_threshold(95),
            GateDefinition::advisory("design_approved", "SPEC_DESIGN_COMPONENTS", "designer")
                .with_threshold(90),
            GateDefinition::blocking("dependencies_approved", "DEPENDENCIES", "devops"),
        ];

        match Self::new(phases, gates) {
            Ok(registry) => registry,
            Err(e) => unreachable!("built-in registry is valid: {e}"),
        }
    }

    pub fn from_file(file: RegistryFile) -> Result<Self> {
        Self::new(file.phases, file.gates)
    }

    /// Load from `phases.json` when present, otherwise use the built-in registry.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::from_file(RegistryFile::load(path)?),
            _ => Ok(Self::builtin()),
        }
    }

    pub fn to_file(&self) -> RegistryFile {
        RegistryFile {
            phases: self.phases.clone(),
            gates: self.gates.clone(),
        }
    }

    /// Apply gate overrides from configuration, returning a new registry.
    pub fn with_gate_overrides(&self, overrides: &HashMap<String, GateOverride>) -> Result<Self> {
        let mut gates = self.gates.clone();
        for (name, gate_override) in overrides {
            let Some(gate) = gates.iter_mut().find(|g| &g.name == name) else {
                bail!("Gate override references unknown gate '{}'", name);
            };
            if let Some(blocking) = gate_override.blocking {
                gate.blocking = blocking;
            }
            if gate_override.auto_approve_threshold.is_some() {
                gate.auto_approve_threshold = gate_override.auto_approve_threshold;
            }
        }
        Self::new(self.phases.clone(), gates)
    }

    pub fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }

    pub fn gates(&self) -> &[GateDefinition] {
        &self.gates
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseSpec> {
        self.index.get(name).map(|&i| &self.phases[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Registry position of a phase.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn first_phase(&self) -> &PhaseSpec {
        &self.phases[0]
    }

    pub fn gate(&self, name: &str) -> Option<&GateDefinition> {
        self.gates.iter().find(|g| g.name == name)
    }

    pub fn gates_for_phase(&self, phase: &str) -> Vec<&GateDefinition> {
        self.gates.iter().filter(|g| g.phase == phase).collect()
    }

    /// Gates of every member of the stage containing `phase`, in phase order.
    pub fn gates_for_stage(&self, phase: &str) -> Vec<&GateDefinition> {
        let members = self
            .stage_of(phase)
            .map(|stage| stage.phases())
            .unwrap_or_default();
        members
            .iter()
            .flat_map(|member| self.gates_for_phase(member))
            .collect()
    }

    pub fn blocking_gates_for_phase(&self, phase: &str) -> Vec<&GateDefinition> {
        self.gates
            .iter()
            .filter(|g| g.phase == phase && g.blocking)
            .collect()
    }

    /// Phase names at or after `phase`, in registry order.
    pub fn phases_from(&self, phase: &str) -> Vec<String> {
        match self.position(phase) {
            Some(pos) => self.phases[pos..].iter().map(|p| p.name.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Phases strictly before `phase`, excluding members of its own stage.
    pub fn phases_before_stage_of(&self, phase: &str) -> Vec<&PhaseSpec> {
        let Some(stage) = self.stage_of(phase) else {
            return Vec::new();
        };
        let Some(first) = self.position(stage.lead_phase()) else {
            return Vec::new();
        };
        self.phases[..first].iter().collect()
    }

    /// The pipeline as ordered stages.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages: Vec<Stage> = Vec::new();
        for phase in &self.phases {
            match &phase.group {
                None => stages.push(Stage::Sequential(phase.name.clone())),
                Some(group) => match stages.last_mut() {
                    Some(Stage::Parallel(current)) if &current.name == group => {
                        current.phases.push(phase.name.clone());
                    }
                    _ => stages.push(Stage::Parallel(PhaseGroup {
                        name: group.clone(),
                        phases: vec![phase.name.clone()],
                    })),
                },
            }
        }
        stages
    }

    pub fn stage_of(&self, phase: &str) -> Option<Stage> {
        self.stages().into_iter().find(|s| s.contains(phase))
    }

    pub fn next_stage_after(&self, phase: &str) -> Option<Stage> {
        let stages = self.stages();
        let pos = stages.iter().position(|s| s.contains(phase))?;
        stages.into_iter().nth(pos + 1)
    }

    pub fn group(&self, name: &str) -> Option<PhaseGroup> {
        self.stages().into_iter().find_map(|s| match s {
            Stage::Parallel(group) if group.name == name => Some(group),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_registry_order() {
        let registry = PhaseRegistry::builtin();
        let names: Vec<_> = registry.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names[0], "ANALYSIS");
        assert_eq!(names[1], "STACK_SELECTION");
        assert_eq!(names[2], "SPEC_PM");
        assert_eq!(*names.last().unwrap(), DONE_PHASE);
        assert_eq!(registry.first_phase().name, "ANALYSIS");
    }

    #[test]
    fn test_builtin_stages_group_parallel_specs() {
        let registry = PhaseRegistry::builtin();
        let stages = registry.stages();
        assert_eq!(stages.len(), registry.phases().len() - 1);
        assert_eq!(
            stages[3],
            Stage::Parallel(PhaseGroup::new(
                "specs",
                &["SPEC_ARCHITECT", "SPEC_DESIGN_TOKENS"]
            ))
        );
        assert_eq!(stages[3].lead_phase(), "SPEC_ARCHITECT");
    }

    #[test]
    fn test_next_stage_after() {
        let registry = PhaseRegistry::builtin();
        assert_eq!(
            registry.next_stage_after("STACK_SELECTION"),
            Some(Stage::Sequential("SPEC_PM".into()))
        );
        let after_pm = registry.next_stage_after("SPEC_PM").unwrap();
        assert!(after_pm.contains("SPEC_DESIGN_TOKENS"));
        assert_eq!(
            registry.next_stage_after("SPEC_DESIGN_TOKENS"),
            Some(Stage::Sequential("SPEC_DESIGN_COMPONENTS".into()))
        );
        assert_eq!(registry.next_stage_after(DONE_PHASE), None);
    }

    #[test]
    fn test_gate_lookup() {
        let registry = PhaseRegistry::builtin();
        let gates = registry.gates_for_phase("STACK_SELECTION");
        assert_eq!(gates.len(), 1);
        assert_eq!(gates[0].name, "stack_approved");
        assert!(registry.blocking_gates_for_phase("SPEC_DESIGN_COMPONENTS").is_empty());
        assert_eq!(
            registry.gate("architecture_approved").unwrap().auto_approve_threshold,
            Some(95)
        );
        assert!(registry.gates_for_phase("ANALYSIS").is_empty());
    }

    #[test]
    fn test_gates_for_stage_covers_every_member() {
        let registry = PhaseRegistry::new(
            vec![
                PhaseSpec::new("A", "x", &[]),
                PhaseSpec::new("B", "x", &[]).in_group("g"),
                PhaseSpec::new("C", "y", &[]).in_group("g"),
            ],
            vec![
                GateDefinition::blocking("b_ok", "B", "owner"),
                GateDefinition::advisory("c_ok", "C", "owner"),
            ],
        )
        .unwrap();
        let names: Vec<_> = registry
            .gates_for_stage("B")
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(names, vec!["b_ok", "c_ok"]);
        assert_eq!(registry.gates_for_stage("C").len(), 2);
        assert!(registry.gates_for_stage("A").is_empty());
        assert!(registry.gates_for_stage("NOPE").is_empty());
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let result = PhaseRegistry::new(
            vec![PhaseSpec::new("A", "x", &[]), PhaseSpec::new("A", "y", &[])],
            vec![],
        );
        assert!(result.unwrap_err().to_string().contains("Duplicate phase"));
    }

    #[test]
    fn test_dangling_gate_rejected() {
        let result = PhaseRegistry::new(
            vec![PhaseSpec::new("A", "x", &[])],
            vec![GateDefinition::blocking("g", "B", "owner")],
        );
        assert!(result.unwrap_err().to_string().contains("unknown phase"));
    }

    #[test]
    fn test_non_contiguous_group_rejected() {
        let result = PhaseRegistry::new(
            vec![
                PhaseSpec::new("A", "x", &[]).in_group("g"),
                PhaseSpec::new("B", "x", &[]),
                PhaseSpec::new("C", "x", &[]).in_group("g"),
            ],
            vec![],
        );
        assert!(result.unwrap_err().to_string().contains("not contiguous"));
    }

    #[test]
    fn test_threshold_above_100_rejected() {
        let result = PhaseRegistry::new(
            vec![PhaseSpec::new("A", "x", &[])],
            vec![GateDefinition::blocking("g", "A", "owner").with_threshold(101)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_phases_from_and_before_stage() {
        let registry = PhaseRegistry::builtin();
        let from = registry.phases_from("SOLUTIONING");
        assert_eq!(from, vec!["SOLUTIONING", "VALIDATE", DONE_PHASE]);
        assert!(registry.phases_from("NOPE").is_empty());

        let before: Vec<_> = registry
            .phases_before_stage_of("SPEC_DESIGN_TOKENS")
            .iter()
            .map(|p| p.name.clone())
            .collect();
        assert_eq!(before, vec!["ANALYSIS", "STACK_SELECTION", "SPEC_PM"]);
    }

    #[test]
    fn test_gate_overrides_applied() {
        let registry = PhaseRegistry::builtin();
        let mut overrides = HashMap::new();
        overrides.insert(
            "stack_approved".to_string(),
            GateOverride {
                blocking: Some(false),
                auto_approve_threshold: Some(80),
            },
        );
        let updated = registry.with_gate_overrides(&overrides).unwrap();
        let gate = updated.gate("stack_approved").unwrap();
        assert!(!gate.blocking);
        assert_eq!(gate.auto_approve_threshold, Some(80));
        // The original registry is untouched.
        assert!(registry.gate("stack_approved").unwrap().blocking);
    }

    #[test]
    fn test_gate_override_unknown_gate() {
        let registry = PhaseRegistry::builtin();
        let mut overrides = HashMap::new();
        overrides.insert("nope".to_string(), GateOverride::default());
        assert!(registry.with_gate_overrides(&overrides).is_err());
    }

    #[test]
    fn test_registry_file_load_and_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        fs::write(
            &path,
            r#"{
                "phases": [
                    {"name": "DRAFT", "agent": "pm", "required_artifacts": ["PRD.md"]},
                    {"name": "REVIEW", "agent": "qa"}
                ],
                "gates": [
                    {"name": "draft_ok", "phase": "DRAFT", "stakeholder": "pm"}
                ]
            }"#,
        )
        .unwrap();

        let registry = PhaseRegistry::load_or_builtin(Some(&path)).unwrap();
        assert_eq!(registry.phases().len(), 2);
        // blocking defaults to true when omitted
        assert!(registry.gate("draft_ok").unwrap().blocking);

        let fallback = PhaseRegistry::load_or_builtin(Some(&dir.path().join("missing.json")))
            .unwrap();
        assert_eq!(fallback.first_phase().name, "ANALYSIS");
    }

    #[test]
    fn test_registry_file_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("phases.json");
        fs::write(&path, "{ invalid json }").unwrap();
        let err = RegistryFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse phases JSON"));
    }

    #[test]
    fn test_is_design_phase() {
        let registry = PhaseRegistry::builtin();
        assert!(registry.phase("SPEC_DESIGN_COMPONENTS").unwrap().is_design_phase());
        assert!(!registry.phase("SPEC_PM").unwrap().is_design_phase());
    }
}
