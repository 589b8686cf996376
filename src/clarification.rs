//! Pre-generation clarification questions and their resolution modes.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Assumption recorded when a question is auto-resolved without suggested options.
pub const DEFAULT_ASSUMPTION: &str =
    "Proceed with the most conventional choice for this kind of project";

/// How open questions get resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClarificationMode {
    /// The user answers every question.
    #[default]
    Interactive,
    /// Questions with suggested options are resolved by the AI; the rest wait for the user.
    Hybrid,
    /// Every question is resolved by the AI.
    Auto,
}

impl fmt::Display for ClarificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClarificationMode::Interactive => "interactive",
            ClarificationMode::Hybrid => "hybrid",
            ClarificationMode::Auto => "auto",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ClarificationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" => Ok(Self::Interactive),
            "hybrid" => Ok(Self::Hybrid),
            "auto" => Ok(Self::Auto),
            other => bail!("Unknown clarification mode '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedBy {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Resolution {
    Unresolved,
    Resolved {
        by: ResolvedBy,
        answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assumption: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub id: String,
    pub category: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub resolution: Resolution,
}

impl ClarificationQuestion {
    pub fn new(id: &str, category: &str, question: &str, options: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            question: question.to_string(),
            options,
            resolution: Resolution::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::Resolved { answer, .. } => Some(answer),
            Resolution::Unresolved => None,
        }
    }

    /// Whether `mode` lets the AI resolve this question on its own.
    pub fn auto_resolvable(&self, mode: ClarificationMode) -> bool {
        match mode {
            ClarificationMode::Interactive => false,
            ClarificationMode::Hybrid => !self.options.is_empty(),
            ClarificationMode::Auto => true,
        }
    }

    fn resolve_by_ai(&mut self) {
        let (answer, assumption) = match self.options.first() {
            Some(first) => (
                first.clone(),
                format!("Assumed '{}' from the suggested options", first),
            ),
            None => (DEFAULT_ASSUMPTION.to_string(), DEFAULT_ASSUMPTION.to_string()),
        };
        self.resolution = Resolution::Resolved {
            by: ResolvedBy::Ai,
            answer,
            assumption: Some(assumption),
        };
    }
}

/// Next free question id (`Q1`, `Q2`, ...).
pub fn next_question_id(questions: &[ClarificationQuestion]) -> String {
    let max = questions
        .iter()
        .filter_map(|q| q.id.strip_prefix('Q').and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0);
    format!("Q{}", max + 1)
}

pub fn pending(questions: &[ClarificationQuestion]) -> Vec<&ClarificationQuestion> {
    questions.iter().filter(|q| !q.is_resolved()).collect()
}

/// Record a user answer. Answering an already-resolved question overwrites it.
pub fn answer_question(
    questions: &mut [ClarificationQuestion],
    id: &str,
    answer: &str,
) -> Result<()> {
    let Some(question) = questions.iter_mut().find(|q| q.id == id) else {
        bail!("Clarification question '{}' not found", id);
    };
    if answer.trim().is_empty() {
        bail!("Answer for '{}' must not be empty", id);
    }
    question.resolution = Resolution::Resolved {
        by: ResolvedBy::User,
        answer: answer.to_string(),
        assumption: None,
    };
    Ok(())
}

/// Resolve every open question `mode` allows; returns how many were resolved.
pub fn auto_resolve(questions: &mut [ClarificationQuestion], mode: ClarificationMode) -> usize {
    let mut resolved = 0;
    for question in questions.iter_mut() {
        if !question.is_resolved() && question.auto_resolvable(mode) {
            question.resolve_by_ai();
            resolved += 1;
        }
    }
    resolved
}
