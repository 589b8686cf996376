//! Critic feedback, verdicts and the decision rule.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a single critic finding. Ordered low < medium < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSeverity {
    Low,
    Medium,
    Critical,
}

impl FeedbackSeverity {
    /// Map the many spellings critics use onto the three levels.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "high" | "blocker" | "severe" | "error" => Some(Self::Critical),
            "medium" | "major" | "moderate" | "warning" => Some(Self::Medium),
            "low" | "minor" | "info" | "trivial" | "note" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for FeedbackSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedbackSeverity::Low => "low",
            FeedbackSeverity::Medium => "medium",
            FeedbackSeverity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticFeedback {
    pub severity: FeedbackSeverity,
    pub category: String,
    pub concern: String,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl CriticFeedback {
    pub fn new(severity: FeedbackSeverity, category: &str, concern: &str) -> Self {
        Self {
            severity,
            category: category.to_string(),
            concern: concern.to_string(),
            recommendation: String::new(),
            location: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: &str) -> Self {
        self.recommendation = recommendation.to_string();
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckerStatus {
    Approved,
    Regenerate,
    Escalate,
}

impl fmt::Display for CheckerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckerStatus::Approved => "approved",
            CheckerStatus::Regenerate => "regenerate",
            CheckerStatus::Escalate => "escalate",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerResult {
    pub status: CheckerStatus,
    pub feedback: Vec<CriticFeedback>,
    /// In [0, 1]
    pub confidence: f64,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
}

impl CheckerResult {
    /// Pass-through result for phases without a critic.
    pub fn pass_through() -> Self {
        Self {
            status: CheckerStatus::Approved,
            feedback: Vec::new(),
            confidence: 1.0,
            summary: "No critic configured for this phase".to_string(),
            persona: None,
        }
    }

    pub fn count(&self, severity: FeedbackSeverity) -> usize {
        self.feedback.iter().filter(|f| f.severity == severity).count()
    }
}

/// Feedback counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn of(feedback: &[CriticFeedback]) -> Self {
        let mut counts = Self::default();
        for item in feedback {
            match item.severity {
                FeedbackSeverity::Critical => counts.critical += 1,
                FeedbackSeverity::Medium => counts.medium += 1,
                FeedbackSeverity::Low => counts.low += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.critical + self.medium + self.low
    }
}

/// Verdict and summary for a feedback list.
///
/// With `escalate_on_critical` unset, critical findings are sent back for
/// regeneration instead of escalating.
pub fn decide(counts: SeverityCounts, escalate_on_critical: bool) -> (CheckerStatus, String) {
    let SeverityCounts {
        critical: c,
        medium: m,
        low: l,
    } = counts;

    if c > 0 {
        if escalate_on_critical {
            return (
                CheckerStatus::Escalate,
                format!("{c} critical issue(s) require human review"),
            );
        }
        return (
            CheckerStatus::Regenerate,
            format!("{c} critical issue(s) must be fixed"),
        );
    }
    if m > 2 {
        (
            CheckerStatus::Regenerate,
            format!("{m} medium issues indicate significant quality problems"),
        )
    } else if m > 0 {
        (
            CheckerStatus::Regenerate,
            format!("{m} medium issue(s) should be addressed"),
        )
    } else if l > 5 {
        (
            CheckerStatus::Regenerate,
            format!("{l} low-severity issues add up"),
        )
    } else {
        (
            CheckerStatus::Approved,
            match l {
                0 => "No issues found".to_string(),
                _ => format!("Approved with {l} minor note(s)"),
            },
        )
    }
}

/// `max(0.5, 1 - density*0.1 - critical*0.2 - medium*0.05)` where density is
/// findings per 10k characters of reviewed output (at least one unit).
pub fn confidence(counts: SeverityCounts, total_artifact_chars: usize) -> f64 {
    let units = (total_artifact_chars as f64 / 10_000.0).max(1.0);
    let density = counts.total() as f64 / units;
    let raw = 1.0 - density * 0.1 - counts.critical as f64 * 0.2 - counts.medium as f64 * 0.05;
    raw.max(0.5)
}
