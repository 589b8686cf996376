//! Inline validation: fast, phase-scoped checks run right after generation.
//!
//! A phase maps to an ordered list of validators. Each validator inspects the
//! phase's artifact map and returns zero or more issues. Errors block the
//! phase; warnings are collected across calls (the most recent
//! `MAX_RETAINED_WARNINGS`) and never block.

pub mod validators;

use crate::artifact::ArtifactMap;
use crate::phase::PhaseRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Warnings kept by an `InlineValidator`; older ones are dropped first.
pub const MAX_RETAINED_WARNINGS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Name of the validator that raised it
    pub validator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(validator: &str, artifact: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            validator: validator.to_string(),
            artifact: artifact.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn warning(validator: &str, artifact: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            ..Self::error(validator, artifact, message)
        }
    }

    /// One-line description, prefixed with the artifact when there is one.
    pub fn describe(&self) -> String {
        match &self.artifact {
            Some(artifact) => format!("{}: {}", artifact, self.message),
            None => self.message.clone(),
        }
    }
}

/// A pluggable predicate over a phase's artifacts.
pub type ValidatorFn = Arc<dyn Fn(&ArtifactMap) -> Vec<ValidationIssue> + Send + Sync>;

#[derive(Clone)]
pub struct Validator {
    pub name: String,
    check: ValidatorFn,
}

impl Validator {
    pub fn new<F>(name: &str, check: F) -> Self
    where
        F: Fn(&ArtifactMap) -> Vec<ValidationIssue> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            check: Arc::new(check),
        }
    }

    pub fn run(&self, artifacts: &ArtifactMap) -> Vec<ValidationIssue> {
        (self.check)(artifacts)
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator").field("name", &self.name).finish()
    }
}

/// Result of validating one phase output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn can_proceed(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            IssueSeverity::Error => self.errors.push(issue),
            IssueSeverity::Warning => self.warnings.push(issue),
        }
    }

    /// All error messages joined, suitable for failure classification.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ValidationIssue::describe)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Phase → ordered validators, plus the warnings seen so far.
#[derive(Debug, Default)]
pub struct InlineValidator {
    validators: HashMap<String, Vec<Validator>>,
    warnings: Mutex<VecDeque<(String, ValidationIssue)>>,
}

impl InlineValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in checks for every phase of the registry.
    pub fn for_registry(registry: &PhaseRegistry) -> Self {
        let mut inline = Self::new();
        for phase in registry.phases() {
            for validator in validators::defaults_for(&phase.required_artifacts) {
                inline.register(&phase.name, validator);
            }
        }
        inline
    }

    /// Append a validator to the phase's list.
    pub fn register(&mut self, phase: &str, validator: Validator) {
        self.validators
            .entry(phase.to_string())
            .or_default()
            .push(validator);
    }

    pub fn with_validator(mut self, phase: &str, validator: Validator) -> Self {
        self.register(phase, validator);
        self
    }

    pub fn validators_for(&self, phase: &str) -> &[Validator] {
        self.validators.get(phase).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run the phase's validators in order.
    pub fn validate(&self, phase: &str, artifacts: &ArtifactMap) -> ValidationReport {
        let mut report = ValidationReport::default();
        for validator in self.validators_for(phase) {
            for issue in validator.run(artifacts) {
                report.push(issue);
            }
        }

        if !report.warnings.is_empty() {
            let mut seen = self.warnings.lock().unwrap_or_else(|e| e.into_inner());
            seen.extend(
                report
                    .warnings
                    .iter()
                    .cloned()
                    .map(|w| (phase.to_string(), w)),
            );
            let excess = seen.len().saturating_sub(MAX_RETAINED_WARNINGS);
            seen.drain(..excess);
        }
        report
    }

    /// Retained warnings, oldest first, tagged with their phase.
    pub fn accumulated_warnings(&self) -> Vec<(String, ValidationIssue)> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Take the retained warnings, leaving none behind.
    pub fn drain_warnings(&self) -> Vec<(String, ValidationIssue)> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }
}
