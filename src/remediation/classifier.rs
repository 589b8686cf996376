//! Keyword classifier for free-text failure messages.
//!
//! Patterns are tried from most to least specific; the first match wins.
//! A small boost is applied when the failing phase is one where that kind of
//! failure is typical.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingRequirementMapping,
    PersonaMismatch,
    ApiDataModelGap,
    StructuralInconsistency,
    FormatValidationError,
    ConstitutionalViolation,
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRequirementMapping => "missing_requirement_mapping",
            Self::PersonaMismatch => "persona_mismatch",
            Self::ApiDataModelGap => "api_data_model_gap",
            Self::StructuralInconsistency => "structural_inconsistency",
            Self::FormatValidationError => "format_validation_error",
            Self::ConstitutionalViolation => "constitutional_violation",
            Self::Unknown => "unknown",
        }
    }

    pub fn all() -> &'static [FailureKind] {
        &[
            Self::MissingRequirementMapping,
            Self::PersonaMismatch,
            Self::ApiDataModelGap,
            Self::StructuralInconsistency,
            Self::FormatValidationError,
            Self::ConstitutionalViolation,
            Self::Unknown,
        ]
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureClassification {
    pub kind: FailureKind,
    /// In [0, 1]
    pub confidence: f64,
    /// The text that triggered the match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
}

const PHASE_BOOST: f64 = 0.05;
const MAX_CONFIDENCE: f64 = 0.99;
const UNKNOWN_CONFIDENCE: f64 = 0.3;

static CONSTITUTIONAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bconstitution(?:al)?\b|\bviolates?\s+(?:the\s+)?(?:article|principle)").unwrap()
});

static FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)invalid\s+(?:json|yaml|markdown)|parse\s+error|failed\s+to\s+parse|malformed|unexpected\s+token|syntax\s+error|formatting|missing\s+heading|missing\s+required\s+(?:artifact|key)|artifact\s+is\s+empty|expected\s+a\s+json\s+object",
    )
    .unwrap()
});

static MISSING_REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)missing\s+requirements?|requirements?\s+(?:(?:is|are)\s+)?not\s+(?:mapped|covered|traced)|unmapped\s+requirements?|untraced\s+requirements?|not\s+traced\s+to",
    )
    .unwrap()
});

static PERSONA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpersonas?\b|target\s+audience|user\s+types?\s+(?:differ|mismatch)").unwrap()
});

static API_DATA_MODEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bapi\b|endpoints?|data[\s-]?model|\bentit(?:y|ies)\b|\bschema\b").unwrap()
});

static STRUCTURAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)structur|inconsisten|mismatch|contradict|out\s+of\s+sync").unwrap()
});

/// Patterns in priority order with their base confidence.
fn patterns() -> [(&'static LazyLock<Regex>, FailureKind, f64); 6] {
    [
        (&CONSTITUTIONAL_RE, FailureKind::ConstitutionalViolation, 0.97),
        (&FORMAT_RE, FailureKind::FormatValidationError, 0.92),
        (&MISSING_REQUIREMENT_RE, FailureKind::MissingRequirementMapping, 0.85),
        (&PERSONA_RE, FailureKind::PersonaMismatch, 0.8),
        (&API_DATA_MODEL_RE, FailureKind::ApiDataModelGap, 0.78),
        (&STRUCTURAL_RE, FailureKind::StructuralInconsistency, 0.75),
    ]
}

/// Phases where a failure kind is expected, earning the boost.
fn typical_for_phase(kind: FailureKind, phase: &str) -> bool {
    match kind {
        FailureKind::MissingRequirementMapping => {
            matches!(phase, "SPEC_PM" | "SOLUTIONING" | "VALIDATE")
        }
        FailureKind::PersonaMismatch => phase == "SPEC_PM" || phase.contains("DESIGN"),
        FailureKind::ApiDataModelGap => phase == "SPEC_ARCHITECT",
        FailureKind::StructuralInconsistency => phase.contains("DESIGN"),
        _ => false,
    }
}

pub fn classify_failure(phase: &str, message: &str) -> FailureClassification {
    for (pattern, kind, base) in patterns() {
        if let Some(m) = pattern.find(message) {
            let confidence = if typical_for_phase(kind, phase) {
                (base + PHASE_BOOST).min(MAX_CONFIDENCE)
            } else {
                base
            };
            return FailureClassification {
                kind,
                confidence,
                matched: Some(m.as_str().to_string()),
            };
        }
    }

    FailureClassification {
        kind: FailureKind::Unknown,
        confidence: UNKNOWN_CONFIDENCE,
        matched: None,
    }
}
