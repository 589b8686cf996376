use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Filename → content for one phase (or accumulated across phases).
///
/// Ordered by filename so that prompts, hashes and listings are deterministic.
pub type ArtifactMap = BTreeMap<String, String>;

/// SHA-256 of the content as lowercase hex.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex(&hasher.finalize())
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A persisted artifact, unique per (project, phase, version, filename).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub project_id: String,
    pub phase: String,
    pub version: u32,
    pub filename: String,
    pub content: String,
    pub size: usize,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(project_id: &str, phase: &str, version: u32, filename: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.to_string(),
            phase: phase.to_string(),
            version,
            filename: filename.to_string(),
            content: content.to_string(),
            size: content.len(),
            hash: content_hash(content),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn same_identity(&self, other: &Artifact) -> bool {
        self.project_id == other.project_id
            && self.phase == other.phase
            && self.version == other.version
            && self.filename == other.filename
    }
}

/// Reduce artifact records to the current content per filename.
///
/// For each (phase, filename) the highest version wins. When two phases
/// produce the same filename, the later record in `order` wins.
pub fn current_content<'a, I>(artifacts: I, order: &[String]) -> ArtifactMap
where
    I: IntoIterator<Item = &'a Artifact>,
{
    let mut latest: BTreeMap<(usize, &str), &Artifact> = BTreeMap::new();
    for artifact in artifacts {
        let rank = order
            .iter()
            .position(|p| p == &artifact.phase)
            .unwrap_or(usize::MAX);
        let key = (rank, artifact.filename.as_str());
        match latest.get(&key) {
            Some(existing) if existing.version >= artifact.version => {}
            _ => {
                latest.insert(key, artifact);
            }
        }
    }

    let mut map = ArtifactMap::new();
    for artifact in latest.values() {
        map.insert(artifact.filename.clone(), artifact.content.clone());
    }
    map
}

/// Total characters across every artifact in the map.
pub fn total_chars(artifacts: &ArtifactMap) -> usize {
    artifacts.values().map(|c| c.chars().count()).sum()
}
