//! Typed error hierarchy for the specforge engine.
//!
//! Four enums cover the subsystems:
//! - `EngineError`: orchestration failures (bad phase names, blocked gates, stale state)
//! - `GateError`: approval gate bookkeeping failures
//! - `RollbackError`: revert precondition and snapshot failures
//! - `StoreError`: persistence failures shared by every store
//!
//! Expected business outcomes (a phase failing, a critic escalating) are not
//! errors; they are reported through `PhaseExecutionResult` and `PhaseOutcome`.

use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Project {id} already exists")]
    ProjectExists { id: String },

    #[error("Project {id} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Snapshot {id} not found")]
    SnapshotNotFound { id: String },

    #[error("Failed to access state file at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("'{id}' is not a valid project id")]
    InvalidProjectId { id: String },

    #[error("Storage task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

/// Errors from the approval gate service.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Gate {gate} is not defined in the phase registry")]
    UnknownGate { gate: String },

    #[error("Gate {gate} has not been initialized for project {project}")]
    NotInitialized { project: String, gate: String },

    #[error("Gate {gate} was already decided ({status})")]
    AlreadyDecided { gate: String, status: String },

    #[error("Score {score} is outside the 0-100 range")]
    InvalidScore { score: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from rollback and snapshot operations.
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("Rollback to {phase} requires explicit confirmation")]
    NotConfirmed { phase: String },

    #[error("Cannot roll back to {phase}: phase has not been completed")]
    TargetNotCompleted { phase: String },

    #[error("Cannot roll back to unknown phase {phase}")]
    UnknownPhase { phase: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Phase {phase} is not registered")]
    UnknownPhase { phase: String },

    #[error("Parallel group {group} references unregistered phases: {}", .phases.join(", "))]
    UnknownGroupMembers { group: String, phases: Vec<String> },

    #[error("Parallel group {group} is malformed: {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("Cannot proceed from {phase}: blocking gate(s) not approved: {}", .gates.join(", "))]
    GateBlocked { phase: String, gates: Vec<String> },

    #[error("Cannot proceed from {phase}: missing required artifacts: {}", .missing.join(", "))]
    MissingArtifacts { phase: String, missing: Vec<String> },

    #[error("Pipeline already complete at {phase}")]
    PipelineComplete { phase: String },

    #[error("Phase {phase} is not active (current phase is {current})")]
    PhaseNotActive { phase: String, current: String },

    #[error("{count} clarification question(s) must be resolved before generation")]
    ClarificationPending { count: usize },

    #[error("Project {project} changed while {phase} was running; results discarded")]
    ConcurrentModification { project: String, phase: String },

    #[error("Invalid project id '{id}': {reason}")]
    InvalidProjectId { id: String, reason: String },

    #[error("Clarification error: {reason}")]
    Clarification { reason: String },

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
