//! Typed error hierarchy for the pipewright control plane.
//!
//! One enum per subsystem:
//! - `StoreError`: durable JSON state files (locking, atomic replace, corruption)
//! - `TaskError`: task queue state machine
//! - `GateError`: phase gate sequencing
//! - `CheckpointError`: checkpoint persistence and repair
//! - `LaunchError`: agent launcher and registry

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the file-backed JSON stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to acquire lock on {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is structurally corrupt: {reason}")]
    StructuralCorruption { path: PathBuf, reason: String },

    #[error("Failed to serialize state for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the task queue.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {0} already exists")]
    DuplicateId(String),

    #[error("Task {0} not found")]
    NotFound(String),

    #[error("Task {id} cannot start: dependencies not completed ({waiting_on:?})")]
    DependenciesNotMet { id: String, waiting_on: Vec<String> },

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the gate runner.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Phase {0} is out of range (expected 1-6)")]
    InvalidPhase(u8),

    #[error("Phase {phase} cannot start: gate for phase {previous} has not passed")]
    PreviousGateNotPassed { phase: u8, previous: u8 },

    #[error("Failed to run checker for phase {phase}: {source}")]
    CheckerSpawn {
        phase: u8,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Errors from checkpoint persistence.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("No checkpoint found at {0}")]
    Missing(PathBuf),

    #[error("Checkpoint is invalid: {0}")]
    Invalid(String),

    #[error("Checkpoint could not be recovered: {0}")]
    Unrecoverable(String),

    #[error("Checkpoint phase {0} does not exist")]
    UnknownPhase(u8),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the agent launcher.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Component {0} already has an active or queued agent")]
    AlreadyScheduled(String),

    #[error("No agent recorded for component {0}")]
    UnknownComponent(String),

    #[error("Failed to spawn agent for {component}: {source}")]
    SpawnFailed {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_error_duplicate_carries_id() {
        let err = TaskError::DuplicateId("T-1".into());
        match &err {
            TaskError::DuplicateId(id) => assert_eq!(id, "T-1"),
            _ => panic!("Expected DuplicateId"),
        }
        assert!(err.to_string().contains("T-1"));
    }

    #[test]
    fn task_error_converts_from_store_error() {
        let inner = StoreError::StructuralCorruption {
            path: PathBuf::from("/tmp/tasks.json"),
            reason: "truncated".into(),
        };
        let err: TaskError = inner.into();
        assert!(matches!(
            err,
            TaskError::Store(StoreError::StructuralCorruption { .. })
        ));
    }

    #[test]
    fn gate_error_previous_not_passed_mentions_both_phases() {
        let err = GateError::PreviousGateNotPassed {
            phase: 4,
            previous: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("Phase 4"));
        assert!(msg.contains("phase 3"));
    }

    #[test]
    fn launch_error_spawn_failed_keeps_component() {
        let err = LaunchError::SpawnFailed {
            component: "auth".into(),
            source: anyhow::anyhow!("no such file"),
        };
        assert!(err.to_string().contains("auth"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&TaskError::NotFound("x".into()));
        assert_std_error(&GateError::InvalidPhase(9));
        assert_std_error(&CheckpointError::Invalid("x".into()));
        assert_std_error(&LaunchError::UnknownComponent("x".into()));
    }
}
