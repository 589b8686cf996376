//! Storage traits for projects, gate records, artifacts and snapshots.
//!
//! Every trait is async and backend-agnostic. Two backends ship with the crate:
//! - `MemoryStore`: process-local, used by tests and embedding callers
//! - `FileStore`: one JSON document per project under `.specforge/state/`,
//!   guarded by an exclusive advisory lock for each read-modify-write
//!
//! Both backends share `ProjectState`, which holds the per-project data and
//! implements the mutation rules once.

pub mod fs;
pub mod memory;

pub use fs::FileStore;
pub use memory::MemoryStore;

use crate::artifact::{Artifact, ArtifactMap};
use crate::errors::StoreError;
use crate::gates::{ApprovalGateRecord, GateStatus};
use crate::project::Project;
use crate::rollback::Snapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a new project. Fails with `ProjectExists` if the id is taken.
    async fn create_project(&self, project: Project) -> StoreResult<Project>;

    async fn get_project(&self, id: &str) -> StoreResult<Project>;

    async fn list_projects(&self) -> StoreResult<Vec<Project>>;

    /// Save `project` if the stored version still equals `project.version`.
    ///
    /// Returns the saved project with its version incremented, or
    /// `VersionConflict` when another writer saved first.
    async fn save_project(&self, project: &Project) -> StoreResult<Project>;
}

/// Outcome of a compare-and-set on a gate record.
#[derive(Debug, Clone, PartialEq)]
pub enum GateTransition {
    Applied(ApprovalGateRecord),
    /// The record was no longer in the expected status
    StatusMismatch(ApprovalGateRecord),
    Missing,
}

#[async_trait]
pub trait GateStore: Send + Sync {
    /// Insert records that do not exist yet; existing records are kept.
    /// Returns how many were inserted.
    async fn insert_gates(
        &self,
        project_id: &str,
        records: Vec<ApprovalGateRecord>,
    ) -> StoreResult<usize>;

    async fn get_gate(&self, project_id: &str, gate: &str)
    -> StoreResult<Option<ApprovalGateRecord>>;

    async fn list_gates(&self, project_id: &str) -> StoreResult<Vec<ApprovalGateRecord>>;

    /// Replace the record for `update.gate` only if its status is `expected`.
    async fn transition_gate(
        &self,
        project_id: &str,
        expected: GateStatus,
        update: ApprovalGateRecord,
    ) -> StoreResult<GateTransition>;

    /// Reset the records of gates attached to `phases` back to pending.
    async fn reset_gates(&self, project_id: &str, phases: &[String]) -> StoreResult<usize>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist `artifacts` as the next version for (project, phase).
    /// Returns the version number written.
    async fn put_artifacts(
        &self,
        project_id: &str,
        phase: &str,
        artifacts: &ArtifactMap,
    ) -> StoreResult<u32>;

    /// Re-insert previously captured records; returns how many were inserted.
    ///
    /// A record whose content is already stored for its (phase, filename) is
    /// skipped, so repeating the call is harmless. A record whose identity was
    /// reused by different content is inserted above the phase's latest
    /// version, making it current again.
    async fn insert_artifacts(&self, project_id: &str, artifacts: Vec<Artifact>)
    -> StoreResult<usize>;

    async fn list_artifacts(&self, project_id: &str) -> StoreResult<Vec<Artifact>>;

    /// Delete exactly `records` (matched by identity and hash); returns what was removed.
    async fn delete_records(&self, project_id: &str, records: &[Artifact])
    -> StoreResult<Vec<Artifact>>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: Snapshot) -> StoreResult<()>;

    /// Fails with `SnapshotNotFound` if absent.
    async fn get_snapshot(&self, project_id: &str, id: &str) -> StoreResult<Snapshot>;

    async fn list_snapshots(&self, project_id: &str) -> StoreResult<Vec<Snapshot>>;
}

/// The four stores the engine needs, usually backed by one object.
#[derive(Clone)]
pub struct Stores {
    pub projects: Arc<dyn ProjectStore>,
    pub gates: Arc<dyn GateStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ProjectStore + GateStore + ArtifactStore + SnapshotStore + 'static,
    {
        Self {
            projects: backend.clone(),
            gates: backend.clone(),
            artifacts: backend.clone(),
            snapshots: backend,
        }
    }

    pub fn memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}

// ---------------------------------------------------------------------------
// Shared per-project state
// ---------------------------------------------------------------------------

/// Everything persisted for one project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub project: Option<Project>,
    #[serde(default)]
    pub gates: BTreeMap<String, ApprovalGateRecord>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

impl ProjectState {
    pub(crate) fn ensure_project(&self, id: &str) -> StoreResult<()> {
        match self.project {
            Some(_) => Ok(()),
            None => Err(StoreError::ProjectNotFound { id: id.to_string() }),
        }
    }

    pub(crate) fn create_project(&mut self, project: Project) -> StoreResult<Project> {
        if self.project.is_some() {
            return Err(StoreError::ProjectExists { id: project.id });
        }
        self.project = Some(project.clone());
        Ok(project)
    }

    pub(crate) fn project(&self, id: &str) -> StoreResult<Project> {
        self.project
            .clone()
            .ok_or_else(|| StoreError::ProjectNotFound { id: id.to_string() })
    }

    pub(crate) fn save_project(&mut self, project: &Project) -> StoreResult<Project> {
        let stored = self
            .project
            .as_mut()
            .ok_or_else(|| StoreError::ProjectNotFound {
                id: project.id.clone(),
            })?;
        if stored.version != project.version {
            return Err(StoreError::VersionConflict {
                id: project.id.clone(),
                expected: project.version,
                found: stored.version,
            });
        }
        let mut saved = project.clone();
        saved.version += 1;
        saved.touch();
        *stored = saved.clone();
        Ok(saved)
    }

    pub(crate) fn insert_gates(&mut self, records: Vec<ApprovalGateRecord>) -> usize {
        let mut inserted = 0;
        for record in records {
            if !self.gates.contains_key(&record.gate) {
                self.gates.insert(record.gate.clone(), record);
                inserted += 1;
            }
        }
        inserted
    }

    pub(crate) fn transition_gate(
        &mut self,
        expected: GateStatus,
        update: ApprovalGateRecord,
    ) -> GateTransition {
        match self.gates.get_mut(&update.gate) {
            None => GateTransition::Missing,
            Some(current) if current.status != expected => {
                GateTransition::StatusMismatch(current.clone())
            }
            Some(current) => {
                *current = update.clone();
                GateTransition::Applied(update)
            }
        }
    }

    pub(crate) fn reset_gates(&mut self, phases: &[String]) -> usize {
        let mut reset = 0;
        for record in self.gates.values_mut() {
            if phases.contains(&record.phase) && record.status != GateStatus::Pending {
                record.reset();
                reset += 1;
            }
        }
        reset
    }

    fn latest_version(&self, phase: &str) -> u32 {
        self.artifacts
            .iter()
            .filter(|a| a.phase == phase)
            .map(|a| a.version)
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn put_artifacts(
        &mut self,
        project_id: &str,
        phase: &str,
        artifacts: &ArtifactMap,
    ) -> u32 {
        let version = self.latest_version(phase) + 1;
        for (filename, content) in artifacts {
            self.artifacts
                .push(Artifact::new(project_id, phase, version, filename, content));
        }
        version
    }

    pub(crate) fn insert_artifacts(&mut self, artifacts: Vec<Artifact>) -> usize {
        // (phase, captured version) -> version assigned on re-insert
        let mut moved: HashMap<(String, u32), u32> = HashMap::new();
        let mut inserted = 0;
        for mut artifact in artifacts {
            let present = self.artifacts.iter().any(|a| {
                a.phase == artifact.phase && a.filename == artifact.filename && a.hash == artifact.hash
            });
            if present {
                continue;
            }
            if self.artifacts.iter().any(|a| a.same_identity(&artifact)) {
                let key = (artifact.phase.clone(), artifact.version);
                let version = match moved.get(&key) {
                    Some(version) => *version,
                    None => {
                        let version = self.latest_version(&artifact.phase) + 1;
                        moved.insert(key, version);
                        version
                    }
                };
                artifact.version = version;
            }
            self.artifacts.push(artifact);
            inserted += 1;
        }
        inserted
    }

    pub(crate) fn delete_records(&mut self, records: &[Artifact]) -> Vec<Artifact> {
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .artifacts
            .drain(..)
            .partition(|a| records.iter().any(|r| r.same_identity(a) && r.hash == a.hash));
        self.artifacts = kept;
        removed
    }

    pub(crate) fn snapshot(&self, id: &str) -> StoreResult<Snapshot> {
        self.snapshots
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| StoreError::SnapshotNotFound { id: id.to_string() })
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// A place that holds one `ProjectState` per project id.
///
/// Implementors only provide scoped access; the store traits are implemented
/// once for every backend on top of it. Closures are owned so a backend can
/// run them on a blocking thread.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Run `f` against a copy of the state; nothing is written back.
    async fn read_state<R, F>(&self, project_id: &str, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&ProjectState) -> StoreResult<R> + Send + 'static;

    /// Run `f` against the state and persist it if `f` succeeds.
    async fn update_state<R, F>(&self, project_id: &str, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ProjectState) -> StoreResult<R> + Send + 'static;

    async fn project_ids(&self) -> StoreResult<Vec<String>>;
}

#[async_trait]
impl<B: StateBackend> ProjectStore for B {
    async fn create_project(&self, project: Project) -> StoreResult<Project> {
        let id = project.id.clone();
        self.update_state(&id, move |state| state.create_project(project))
            .await
    }

    async fn get_project(&self, id: &str) -> StoreResult<Project> {
        let owned = id.to_string();
        self.read_state(id, move |state| state.project(&owned)).await
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let mut projects = Vec::new();
        for id in self.project_ids().await? {
            if let Some(project) = self
                .read_state(&id, |state| Ok(state.project.clone()))
                .await?
            {
                projects.push(project);
            }
        }
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    async fn save_project(&self, project: &Project) -> StoreResult<Project> {
        let owned = project.clone();
        self.update_state(&project.id, move |state| state.save_project(&owned))
            .await
    }
}

#[async_trait]
impl<B: StateBackend> GateStore for B {
    async fn insert_gates(
        &self,
        project_id: &str,
        records: Vec<ApprovalGateRecord>,
    ) -> StoreResult<usize> {
        let id = project_id.to_string();
        self.update_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.insert_gates(records))
        })
        .await
    }

    async fn get_gate(
        &self,
        project_id: &str,
        gate: &str,
    ) -> StoreResult<Option<ApprovalGateRecord>> {
        let id = project_id.to_string();
        let gate = gate.to_string();
        self.read_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.gates.get(&gate).cloned())
        })
        .await
    }

    async fn list_gates(&self, project_id: &str) -> StoreResult<Vec<ApprovalGateRecord>> {
        let id = project_id.to_string();
        self.read_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.gates.values().cloned().collect())
        })
        .await
    }

    async fn transition_gate(
        &self,
        project_id: &str,
        expected: GateStatus,
        update: ApprovalGateRecord,
    ) -> StoreResult<GateTransition> {
        let id = project_id.to_string();
        self.update_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.transition_gate(expected, update))
        })
        .await
    }

    async fn reset_gates(&self, project_id: &str, phases: &[String]) -> StoreResult<usize> {
        let id = project_id.to_string();
        let phases = phases.to_vec();
        self.update_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.reset_gates(&phases))
        })
        .await
    }
}

#[async_trait]
impl<B: StateBackend> ArtifactStore for B {
    async fn put_artifacts(
        &self,
        project_id: &str,
        phase: &str,
        artifacts: &ArtifactMap,
    ) -> StoreResult<u32> {
        let id = project_id.to_string();
        let phase = phase.to_string();
        let artifacts = artifacts.clone();
        self.update_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.put_artifacts(&id, &phase, &artifacts))
        })
        .await
    }

    async fn insert_artifacts(
        &self,
        project_id: &str,
        artifacts: Vec<Artifact>,
    ) -> StoreResult<usize> {
        let id = project_id.to_string();
        self.update_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.insert_artifacts(artifacts))
        })
        .await
    }

    async fn list_artifacts(&self, project_id: &str) -> StoreResult<Vec<Artifact>> {
        let id = project_id.to_string();
        self.read_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.artifacts.clone())
        })
        .await
    }

    async fn delete_records(
        &self,
        project_id: &str,
        records: &[Artifact],
    ) -> StoreResult<Vec<Artifact>> {
        let id = project_id.to_string();
        let records = records.to_vec();
        self.update_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.delete_records(&records))
        })
        .await
    }
}

#[async_trait]
impl<B: StateBackend> SnapshotStore for B {
    async fn save_snapshot(&self, snapshot: Snapshot) -> StoreResult<()> {
        let project_id = snapshot.project_id.clone();
        let id = project_id.clone();
        self.update_state(&project_id, move |state| {
            state.ensure_project(&id)?;
            state.snapshots.push(snapshot);
            Ok(())
        })
        .await
    }

    async fn get_snapshot(&self, project_id: &str, id: &str) -> StoreResult<Snapshot> {
        let id = id.to_string();
        self.read_state(project_id, move |state| state.snapshot(&id))
            .await
    }

    async fn list_snapshots(&self, project_id: &str) -> StoreResult<Vec<Snapshot>> {
        let id = project_id.to_string();
        self.read_state(project_id, move |state| {
            state.ensure_project(&id)?;
            Ok(state.snapshots.clone())
        })
        .await
    }
}
