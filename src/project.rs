use crate::clarification::{self, ClarificationQuestion};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project moving through the phase pipeline.
///
/// Only the engine mutates a project; `version` increases on every save so a
/// long-running phase can detect that the project changed underneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Slug, unique per store
    pub id: String,
    pub name: String,
    pub current_phase: String,
    /// Completed phases in completion order
    #[serde(default)]
    pub phases_completed: Vec<String>,
    #[serde(default)]
    pub clarifications: Vec<ClarificationQuestion>,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: &str, name: &str, first_phase: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            current_phase: first_phase.to_string(),
            phases_completed: Vec::new(),
            clarifications: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_completed(&self, phase: &str) -> bool {
        self.phases_completed.iter().any(|p| p == phase)
    }

    pub fn pending_clarifications(&self) -> usize {
        clarification::pending(&self.clarifications).len()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Project slugs are lowercase ASCII letters, digits and single hyphens.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() || slug.len() > 64 {
        bail!("Project slug must be 1-64 characters long");
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "Project slug '{}' may only contain lowercase letters, digits and hyphens",
            slug
        );
    }
    if slug.starts_with('-') || slug.ends_with('-') || slug.contains("--") {
        bail!("Project slug '{}' has a misplaced hyphen", slug);
    }
    Ok(())
}
