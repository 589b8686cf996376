//! Rollback of a project to an earlier phase, with snapshots.
//!
//! A rollback needs explicit confirmation and a target the project has
//! already completed. It first rewinds `phases_completed` and moves the
//! project to the target, which fences off in-flight runs (their claim sees
//! the new version). It then captures a `Snapshot` of the affected artifacts,
//! deletes exactly the captured records and resets the gates of every
//! removed phase. Records written after the capture are never deleted.
//!
//! When the target belongs to a parallel group the whole group is rolled back.

pub mod snapshot;

pub use snapshot::{Snapshot, commit_id_for};

use crate::artifact::Artifact;
use crate::errors::{RollbackError, StoreError};
use crate::phase::PhaseRegistry;
use crate::project::Project;
use crate::store::Stores;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Attempts at rewinding the project when another writer got there first.
const SAVE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct RollbackRequest {
    pub project_id: String,
    pub target_phase: String,
    pub confirm: bool,
}

impl RollbackRequest {
    pub fn new(project_id: &str, target_phase: &str, confirm: bool) -> Self {
        Self {
            project_id: project_id.to_string(),
            target_phase: target_phase.to_string(),
            confirm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub phase: String,
    pub filename: String,
    pub version: u32,
    pub size: usize,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(a: &Artifact) -> Self {
        Self {
            phase: a.phase.clone(),
            filename: a.filename.clone(),
            version: a.version,
            size: a.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub snapshot_id: String,
    pub target_phase: String,
    pub removed_phases: Vec<String>,
    /// `phase/filename` of every artifact removed (all versions)
    pub removed_artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    pub gates_reset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewMetadata {
    pub target_phase: String,
    pub phases_to_remove: Vec<String>,
    pub artifact_count: usize,
    pub total_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackPreview {
    pub artifacts: Vec<ArtifactSummary>,
    pub metadata: PreviewMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub snapshot_id: String,
    /// Records re-inserted by this call, including ones moved to a new
    /// version because a re-run reused their identity; zero when already restored
    pub restored: usize,
    pub already_present: usize,
}

/// What a rollback to a given target would touch.
struct RollbackPlan {
    project: Project,
    target: String,
    phases_to_remove: Vec<String>,
    artifacts: Vec<Artifact>,
}

pub struct RollbackService {
    registry: Arc<PhaseRegistry>,
    stores: Stores,
}

impl RollbackService {
    pub fn new(registry: Arc<PhaseRegistry>, stores: Stores) -> Self {
        Self { registry, stores }
    }

    pub async fn rollback_to_phase(
        &self,
        req: RollbackRequest,
    ) -> Result<RollbackOutcome, RollbackError> {
        if !req.confirm {
            return Err(RollbackError::NotConfirmed {
                phase: req.target_phase,
            });
        }

        let (plan, rewound) = self.rewind(&req.project_id, &req.target_phase).await?;

        // Capture before anything is deleted.
        let snapshot = Snapshot::capture(
            &req.project_id,
            &plan.target,
            &plan.project.phases_completed,
            plan.artifacts.clone(),
        );
        let snapshot_id = snapshot.id.clone();
        let commit_id = snapshot.commit_id.clone();
        if let Err(e) = self.stores.snapshots.save_snapshot(snapshot).await {
            self.undo_rewind(&plan, rewound).await;
            return Err(e.into());
        }

        let removed = self
            .stores
            .artifacts
            .delete_records(&req.project_id, &plan.artifacts)
            .await?;

        let gates_reset = self
            .stores
            .gates
            .reset_gates(&req.project_id, &plan.phases_to_remove)
            .await?;

        let removed_artifacts: Vec<String> = removed
            .iter()
            .map(|a| format!("{}/{}", a.phase, a.filename))
            .collect();

        info!(
            project = %req.project_id,
            target = %plan.target,
            snapshot = %snapshot_id,
            removed = removed_artifacts.len(),
            gates_reset,
            "Rolled back project"
        );

        Ok(RollbackOutcome {
            snapshot_id,
            target_phase: plan.target,
            removed_phases: plan.phases_to_remove,
            removed_artifacts,
            commit_id,
            gates_reset,
        })
    }

    /// Read-only version of `rollback_to_phase`.
    pub async fn preview(
        &self,
        project_id: &str,
        target_phase: &str,
    ) -> Result<RollbackPreview, RollbackError> {
        let plan = self.plan(project_id, target_phase).await?;
        let total_bytes = plan.artifacts.iter().map(|a| a.size).sum();
        Ok(RollbackPreview {
            artifacts: plan.artifacts.iter().map(ArtifactSummary::from).collect(),
            metadata: PreviewMetadata {
                target_phase: plan.target,
                phases_to_remove: plan.phases_to_remove,
                artifact_count: plan.artifacts.len(),
                total_bytes,
            },
            commit_id: commit_id_for(&plan.artifacts),
        })
    }

    /// Re-insert a snapshot's artifacts. Repeating the call inserts nothing.
    pub async fn restore_snapshot(
        &self,
        project_id: &str,
        snapshot_id: &str,
    ) -> Result<RestoreOutcome, RollbackError> {
        let snapshot = self
            .stores
            .snapshots
            .get_snapshot(project_id, snapshot_id)
            .await?;
        let total = snapshot.artifacts.len();
        let restored = self
            .stores
            .artifacts
            .insert_artifacts(project_id, snapshot.artifacts)
            .await?;

        info!(project = project_id, snapshot = snapshot_id, restored, "Restored snapshot");
        Ok(RestoreOutcome {
            snapshot_id: snapshot_id.to_string(),
            restored,
            already_present: total - restored,
        })
    }

    pub async fn list_snapshots(&self, project_id: &str) -> Result<Vec<Snapshot>, RollbackError> {
        Ok(self.stores.snapshots.list_snapshots(project_id).await?)
    }

    async fn plan(&self, project_id: &str, target_phase: &str) -> Result<RollbackPlan, RollbackError> {
        let stage = self
            .registry
            .stage_of(target_phase)
            .ok_or_else(|| RollbackError::UnknownPhase {
                phase: target_phase.to_string(),
            })?;

        let project = self.stores.projects.get_project(project_id).await?;
        if !project.has_completed(target_phase) {
            return Err(RollbackError::TargetNotCompleted {
                phase: target_phase.to_string(),
            });
        }

        let target = stage.lead_phase().to_string();
        let phases_to_remove = self.registry.phases_from(&target);
        let artifacts = self
            .stores
            .artifacts
            .list_artifacts(project_id)
            .await?
            .into_iter()
            .filter(|a| phases_to_remove.contains(&a.phase))
            .collect();

        Ok(RollbackPlan {
            project,
            target,
            phases_to_remove,
            artifacts,
        })
    }

    /// Plan and save the rewound project in one compare-and-set, re-planning
    /// when another writer saved first.
    async fn rewind(
        &self,
        project_id: &str,
        target_phase: &str,
    ) -> Result<(RollbackPlan, Project), RollbackError> {
        let mut attempt = 1;
        loop {
            let plan = self.plan(project_id, target_phase).await?;
            let mut project = plan.project.clone();
            project
                .phases_completed
                .retain(|p| !plan.phases_to_remove.contains(p));
            project.current_phase = plan.target.clone();

            match self.stores.projects.save_project(&project).await {
                Ok(saved) => return Ok((plan, saved)),
                Err(StoreError::VersionConflict { .. }) if attempt < SAVE_ATTEMPTS => {
                    warn!(project = project_id, attempt, "Project changed during rollback; retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Put the pre-rollback position back after a failed capture.
    async fn undo_rewind(&self, plan: &RollbackPlan, mut rewound: Project) {
        rewound.phases_completed = plan.project.phases_completed.clone();
        rewound.current_phase = plan.project.current_phase.clone();
        if let Err(e) = self.stores.projects.save_project(&rewound).await {
            error!(
                project = %rewound.id,
                error = %e,
                "Could not undo rewind; artifacts are intact but the project stays at {}",
                plan.target
            );
        }
    }
}
