//! Critic personas for the adversarial review.
//!
//! Four built-in personas cover the phases whose output most often needs a
//! second opinion:
//!
//! - `stack-skeptic`: technology stack proposals
//! - `product-skeptic`: product requirements
//! - `architecture-critic`: data model and API specs
//! - `design-critic`: UI component inventories

use super::feedback::FeedbackSeverity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticPersona {
    pub name: String,
    /// One-sentence stance the critic takes
    pub perspective: String,
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub review_criteria: Vec<String>,
    /// Feedback below this severity is discarded
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: FeedbackSeverity,
}

fn default_severity_threshold() -> FeedbackSeverity {
    FeedbackSeverity::Low
}

impl CriticPersona {
    pub fn new(name: &str, perspective: &str) -> Self {
        Self {
            name: name.to_string(),
            perspective: perspective.to_string(),
            expertise: Vec::new(),
            review_criteria: Vec::new(),
            severity_threshold: default_severity_threshold(),
        }
    }

    pub fn with_expertise(mut self, expertise: &[&str]) -> Self {
        self.expertise = expertise.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_criteria(mut self, criteria: &[&str]) -> Self {
        self.review_criteria = criteria.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_severity_threshold(mut self, threshold: FeedbackSeverity) -> Self {
        self.severity_threshold = threshold;
        self
    }

    pub fn stack_skeptic() -> Self {
        Self::new(
            "stack-skeptic",
            "Assume the proposed stack is over-engineered until proven otherwise",
        )
        .with_expertise(&["platform engineering", "operational cost", "team skills"])
        .with_criteria(&[
            "Every technology choice is justified by a stated requirement",
            "No more than one new technology per layer",
            "Hosting and licensing costs are addressed",
            "stack.json agrees with stack-analysis.md",
        ])
    }

    pub fn product_skeptic() -> Self {
        Self::new(
            "product-skeptic",
            "Challenge every requirement that cannot be traced back to the brief",
        )
        .with_expertise(&["product management", "user research", "scope control"])
        .with_criteria(&[
            "Every requirement in the brief is covered by the PRD",
            "User personas are consistent across sections",
            "Acceptance criteria are testable",
            "Non-goals are stated explicitly",
        ])
    }

    pub fn architecture_critic() -> Self {
        Self::new(
            "architecture-critic",
            "Look for gaps between the data model, the API and the PRD",
        )
        .with_expertise(&["data modeling", "API design", "security"])
        .with_criteria(&[
            "Every entity in the data model is reachable through the API",
            "Every endpoint references entities that exist in the data model",
            "Authentication and authorization are specified per endpoint",
            "Relationships and cardinalities are explicit",
        ])
    }

    pub fn design_critic() -> Self {
        Self::new(
            "design-critic",
            "Check that the component inventory is buildable from the design tokens",
        )
        .with_expertise(&["design systems", "accessibility", "interaction design"])
        .with_criteria(&[
            "Components only use colors, spacing and type defined in design-tokens.md",
            "Every user journey in the PRD has the components it needs",
            "Accessibility states (focus, error, disabled) are covered",
        ])
    }

    /// Look up a built-in persona by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "stack-skeptic" => Some(Self::stack_skeptic()),
            "product-skeptic" => Some(Self::product_skeptic()),
            "architecture-critic" => Some(Self::architecture_critic()),
            "design-critic" => Some(Self::design_critic()),
            _ => None,
        }
    }

    /// Names of all built-in personas.
    pub fn builtin_names() -> &'static [&'static str] {
        &[
            "stack-skeptic",
            "product-skeptic",
            "architecture-critic",
            "design-critic",
        ]
    }
}

/// The persona reviewing a built-in phase by default.
pub fn default_persona_for_phase(phase: &str) -> Option<CriticPersona> {
    match phase {
        "STACK_SELECTION" => Some(CriticPersona::stack_skeptic()),
        "SPEC_PM" => Some(CriticPersona::product_skeptic()),
        "SPEC_ARCHITECT" => Some(CriticPersona::architecture_critic()),
        "SPEC_DESIGN_COMPONENTS" => Some(CriticPersona::design_critic()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_covers_all_names() {
        for name in CriticPersona::builtin_names() {
            let persona = CriticPersona::builtin(name).unwrap();
            assert_eq!(&persona.name, name);
            assert!(!persona.review_criteria.is_empty());
        }
        assert!(CriticPersona::builtin("cheerleader").is_none());
    }

    #[test]
    fn test_default_personas_by_phase() {
        assert_eq!(
            default_persona_for_phase("SPEC_PM").unwrap().name,
            "product-skeptic"
        );
        assert!(default_persona_for_phase("ANALYSIS").is_none());
    }

    #[test]
    fn test_persona_deserializes_with_defaults() {
        let persona: CriticPersona =
            serde_json::from_str(r#"{"name": "x", "perspective": "y"}"#).unwrap();
        assert_eq!(persona.severity_threshold, FeedbackSeverity::Low);
        assert!(persona.expertise.is_empty());
    }
}
