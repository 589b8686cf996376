use crate::artifact::{Artifact, hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Artifact state captured before a rollback deletes it. Never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub project_id: String,
    pub target_phase: String,
    /// `phases_completed` at capture time
    #[serde(default)]
    pub phases_completed: Vec<String>,
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn capture(
        project_id: &str,
        target_phase: &str,
        phases_completed: &[String],
        artifacts: Vec<Artifact>,
    ) -> Self {
        let commit_id = commit_id_for(&artifacts);
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            target_phase: target_phase.to_string(),
            phases_completed: phases_completed.to_vec(),
            artifacts,
            commit_id,
            created_at: Utc::now(),
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.artifacts.iter().map(|a| a.size).sum()
    }

    /// Short form of the commit id (first 12 hex chars).
    pub fn short_commit(&self) -> Option<&str> {
        self.commit_id
            .as_deref()
            .map(|c| &c[..12.min(c.len())])
    }
}

/// Content address of an artifact set: SHA-256 over the sorted
/// `phase/version/filename/hash` lines. `None` for an empty set.
pub fn commit_id_for(artifacts: &[Artifact]) -> Option<String> {
    if artifacts.is_empty() {
        return None;
    }
    let mut lines: Vec<String> = artifacts
        .iter()
        .map(|a| format!("{}\t{}\t{}\t{}", a.phase, a.version, a.filename, a.hash))
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    for line in &lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Some(hex(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(phase: &str, version: u32, name: &str, content: &str) -> Artifact {
        Artifact::new("acme", phase, version, name, content)
    }

    #[test]
    fn test_commit_id_is_order_independent() {
        let a = artifact("SPEC_PM", 1, "PRD.md", "one");
        let b = artifact("STACK_SELECTION", 2, "stack.json", "{}");
        assert_eq!(
            commit_id_for(&[a.clone(), b.clone()]),
            commit_id_for(&[b, a])
        );
    }

    #[test]
    fn test_commit_id_changes_with_content() {
        let a = artifact("SPEC_PM", 1, "PRD.md", "one");
        let b = artifact("SPEC_PM", 1, "PRD.md", "two");
        assert_ne!(commit_id_for(&[a]), commit_id_for(&[b]));
        assert_eq!(commit_id_for(&[]), None);
    }

    #[test]
    fn test_capture() {
        let snapshot = Snapshot::capture(
            "acme",
            "SPEC_PM",
            &["ANALYSIS".to_string()],
            vec![artifact("SPEC_PM", 1, "PRD.md", "12345")],
        );
        assert_eq!(snapshot.total_bytes(), 5);
        assert_eq!(snapshot.commit_id.as_ref().unwrap().len(), 64);
        assert_eq!(snapshot.short_commit().unwrap().len(), 12);
        assert!(Uuid::parse_str(&snapshot.id).is_ok());
    }
}
