//! Checker pattern: adversarial critic review of generated artifacts.
//!
//! Each configured phase has a critic persona, a regeneration budget and an
//! escalation policy. `execute_check` sends the persona's criteria plus the
//! (truncated) artifacts to a `ReviewClient`, decodes whatever comes back, and
//! turns the feedback into an approved / regenerate / escalate verdict.
//!
//! Phases without a critic pass straight through as approved.

pub mod client;
pub mod decoder;
pub mod feedback;
pub mod persona;

pub use client::{CommandReviewClient, ReviewClient};
pub use decoder::{ParseFailure, ParsedFeedback, decode_feedback};
pub use feedback::{
    CheckerResult, CheckerStatus, CriticFeedback, FeedbackSeverity, SeverityCounts,
};
pub use persona::{CriticPersona, default_persona_for_phase};

use crate::artifact::{ArtifactMap, total_chars};
use crate::util::truncate_chars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-artifact character budget in review prompts.
pub const DEFAULT_MAX_ARTIFACT_CHARS: usize = 8_000;
pub const DEFAULT_MAX_REGENERATIONS: u32 = 2;
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Critic settings for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerConfig {
    pub persona: CriticPersona,
    pub max_regenerations: u32,
    pub escalate_on_critical: bool,
}

impl CheckerConfig {
    pub fn new(persona: CriticPersona) -> Self {
        Self {
            persona,
            max_regenerations: DEFAULT_MAX_REGENERATIONS,
            escalate_on_critical: true,
        }
    }

    pub fn with_max_regenerations(mut self, max: u32) -> Self {
        self.max_regenerations = max;
        self
    }

    pub fn with_escalate_on_critical(mut self, escalate: bool) -> Self {
        self.escalate_on_critical = escalate;
        self
    }
}

/// What the critic is told about the surrounding project.
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    pub project_id: String,
    /// 1-based generation attempt being reviewed
    pub attempt: u32,
    /// Artifacts produced by earlier phases, by name
    pub upstream_artifacts: Vec<String>,
}

pub struct CheckerPattern {
    configs: HashMap<String, CheckerConfig>,
    client: Option<Arc<dyn ReviewClient>>,
    max_artifact_chars: usize,
}

impl CheckerPattern {
    pub fn new(client: Arc<dyn ReviewClient>) -> Self {
        Self {
            configs: HashMap::new(),
            client: Some(client),
            max_artifact_chars: DEFAULT_MAX_ARTIFACT_CHARS,
        }
    }

    /// A checker that approves everything without a review.
    pub fn disabled() -> Self {
        Self {
            configs: HashMap::new(),
            client: None,
            max_artifact_chars: DEFAULT_MAX_ARTIFACT_CHARS,
        }
    }

    /// Configure the built-in persona for every phase that has one.
    pub fn with_default_personas<'a>(mut self, phases: impl IntoIterator<Item = &'a str>) -> Self {
        for phase in phases {
            if let Some(persona) = default_persona_for_phase(phase) {
                self.configs
                    .insert(phase.to_string(), CheckerConfig::new(persona));
            }
        }
        self
    }

    pub fn with_phase(mut self, phase: &str, config: CheckerConfig) -> Self {
        self.configs.insert(phase.to_string(), config);
        self
    }

    pub fn with_max_artifact_chars(mut self, max: usize) -> Self {
        self.max_artifact_chars = max;
        self
    }

    /// The critic config in effect for `phase`, if reviews are enabled.
    pub fn config_for(&self, phase: &str) -> Option<&CheckerConfig> {
        self.client.as_ref()?;
        self.configs.get(phase)
    }

    /// Review a phase's artifacts.
    pub async fn execute_check(
        &self,
        phase: &str,
        artifacts: &ArtifactMap,
        context: &CheckContext,
    ) -> CheckerResult {
        let (Some(config), Some(client)) = (self.config_for(phase), self.client.as_ref()) else {
            return CheckerResult::pass_through();
        };

        let prompt = build_review_prompt(
            &config.persona,
            phase,
            artifacts,
            context,
            self.max_artifact_chars,
        );

        let text = match client.review(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    project = %context.project_id,
                    phase,
                    persona = %config.persona.name,
                    error = %e,
                    "Critic review failed; escalating"
                );
                return CheckerResult {
                    status: CheckerStatus::Escalate,
                    feedback: Vec::new(),
                    confidence: 0.0,
                    summary: format!("Critic review failed: {e:#}"),
                    persona: Some(config.persona.name.clone()),
                };
            }
        };

        let findings: Vec<CriticFeedback> = decoder::decode_feedback_or_empty(&text)
            .into_iter()
            .filter(|f| f.severity >= config.persona.severity_threshold)
            .collect();
        let counts = SeverityCounts::of(&findings);
        let (status, summary) = feedback::decide(counts, config.escalate_on_critical);
        let confidence = feedback::confidence(counts, total_chars(artifacts));

        info!(
            project = %context.project_id,
            phase,
            persona = %config.persona.name,
            verdict = %status,
            critical = counts.critical,
            medium = counts.medium,
            low = counts.low,
            confidence,
            "Critic verdict"
        );

        CheckerResult {
            status,
            feedback: findings,
            confidence,
            summary,
            persona: Some(config.persona.name.clone()),
        }
    }
}

/// Build the critic prompt: persona, criteria, then each artifact truncated
/// to `max_artifact_chars`.
pub fn build_review_prompt(
    persona: &CriticPersona,
    phase: &str,
    artifacts: &ArtifactMap,
    context: &CheckContext,
    max_artifact_chars: usize,
) -> String {
    let criteria = persona
        .review_criteria
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");

    let expertise = if persona.expertise.is_empty() {
        "general review".to_string()
    } else {
        persona.expertise.join(", ")
    };

    let upstream = if context.upstream_artifacts.is_empty() {
        "none".to_string()
    } else {
        context.upstream_artifacts.join(", ")
    };

    let documents = artifacts
        .iter()
        .map(|(name, content)| {
            format!(
                "### {name}\n\n{}\n",
                truncate_chars(content, max_artifact_chars, TRUNCATION_MARKER)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"# Critic Review: {name}

{perspective}

## Context
- Project: {project}
- Phase: {phase}
- Attempt: {attempt}
- Expertise: {expertise}
- Earlier artifacts: {upstream}

## Review Criteria
{criteria}

Only report issues of severity "{threshold}" or higher.

## Artifacts

{documents}
## Output Format

Respond with a JSON object:

```json
{{
  "feedback": [
    {{
      "severity": "low|medium|critical",
      "category": "short category",
      "concern": "what is wrong",
      "recommendation": "how to fix it",
      "location": "artifact name or section (optional)"
    }}
  ]
}}
```

Return an empty list if there is nothing to report.
"#,
        name = persona.name,
        perspective = persona.perspective,
        project = context.project_id,
        attempt = context.attempt.max(1),
        threshold = persona.severity_threshold,
    )
}

/// Append critic feedback to the prompt that produced the rejected output.
pub fn build_regeneration_prompt(original_prompt: &str, feedback: &[CriticFeedback]) -> String {
    if feedback.is_empty() {
        return original_prompt.to_string();
    }

    let mut sorted: Vec<&CriticFeedback> = feedback.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));

    let items = sorted
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let location = f
                .location
                .as_ref()
                .map(|l| format!(" ({l})"))
                .unwrap_or_default();
            let recommendation = if f.recommendation.is_empty() {
                String::new()
            } else {
                format!("\n   Recommendation: {}", f.recommendation)
            };
            format!(
                "{}. [{}] {}{}: {}{}",
                i + 1,
                f.severity,
                f.category,
                location,
                f.concern,
                recommendation
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let base = original_prompt.trim_end();
    let separator = if base.is_empty() { "" } else { "\n\n" };
    format!(
        "{base}{separator}## Critic Feedback\n\nA reviewer rejected the previous output. \
         Regenerate every artifact and address each point below:\n\n{items}\n"
    )
}
