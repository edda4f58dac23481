use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::model::{
    Checkpoint, CheckpointStatus, ComponentState, OriginalRequest, SpecFile, StoppingContext,
    checkpoint_from_value, parse_checkpoint, sha256_hex,
};
use crate::config::Config;
use crate::errors::CheckpointError;
use crate::phase::{self, Phase};
use crate::store::JsonStore;
use crate::store::repair::{self, RepairStrategy};

/// Result of reading `checkpoint.json`. Reading never fails hard.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Missing,
    Valid(Box<Checkpoint>),
    Invalid { reason: String },
}

/// What `recover` did.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub checkpoint: Checkpoint,
    /// `None` when the file was already valid and nothing was rewritten
    pub strategy: Option<RepairStrategy>,
    pub backup_path: Option<PathBuf>,
}

/// Durable orchestration snapshot.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    store: JsonStore<Checkpoint>,
    project_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(config: &Config) -> Self {
        Self::open(config.checkpoint_file.clone(), config.project_dir.clone())
    }

    pub fn open(path: PathBuf, project_dir: PathBuf) -> Self {
        Self {
            store: JsonStore::new(path),
            project_dir,
        }
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Start a new orchestration, replacing any previous checkpoint.
    pub fn create(
        &self,
        prompt: &str,
        spec_files: &[PathBuf],
        components: &[String],
    ) -> Result<Checkpoint, CheckpointError> {
        let request = OriginalRequest {
            prompt: prompt.to_string(),
            spec_files: spec_files.iter().map(|p| self.describe_spec(p)).collect(),
        };
        let checkpoint = Checkpoint::new(request, components, Utc::now());

        let _lock = self.store.lock()?;
        if let Ok(Some(text)) = self.store.read_text()
            && let Ok(previous) = parse_checkpoint(&text)
            && previous.status != CheckpointStatus::Completed
        {
            warn!(
                previous = %previous.orchestration_id,
                status = %previous.status,
                "Replacing unfinished checkpoint"
            );
        }
        self.store.write(&checkpoint)?;
        info!(id = %checkpoint.orchestration_id, "Created checkpoint");
        Ok(checkpoint)
    }

    fn describe_spec(&self, path: &Path) -> SpecFile {
        let full = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        };
        let relative = full.strip_prefix(&self.project_dir).unwrap_or(&full);
        SpecFile {
            path: relative.to_string_lossy().to_string(),
            sha256: std::fs::read(&full).ok().map(|bytes| sha256_hex(&bytes)),
        }
    }

    /// Read and validate the checkpoint without repairing anything.
    pub fn load(&self) -> LoadOutcome {
        match self.store.read_text() {
            Ok(None) => LoadOutcome::Missing,
            Ok(Some(text)) => match parse_checkpoint(&text) {
                Ok(cp) => LoadOutcome::Valid(Box::new(cp)),
                Err(reason) => LoadOutcome::Invalid { reason },
            },
            Err(e) => LoadOutcome::Invalid {
                reason: e.to_string(),
            },
        }
    }

    /// The checkpoint, or an error saying why there is no usable one.
    pub fn load_valid(&self) -> Result<Checkpoint, CheckpointError> {
        match self.load() {
            LoadOutcome::Valid(cp) => Ok(*cp),
            LoadOutcome::Missing => Err(CheckpointError::Missing(self.path().to_path_buf())),
            LoadOutcome::Invalid { reason } => Err(CheckpointError::Invalid(reason)),
        }
    }

    /// Load under the lock, apply `f`, bump `last_updated`, write back.
    pub fn update<F>(&self, f: F) -> Result<Checkpoint, CheckpointError>
    where
        F: FnOnce(&mut Checkpoint) -> Result<(), CheckpointError>,
    {
        let _lock = self.store.lock()?;
        let text = self
            .store
            .read_text()?
            .ok_or_else(|| CheckpointError::Missing(self.path().to_path_buf()))?;
        let mut checkpoint = parse_checkpoint(&text).map_err(CheckpointError::Invalid)?;

        let request = checkpoint.original_request.clone();
        f(&mut checkpoint)?;
        checkpoint.original_request = request;
        checkpoint.last_updated = Utc::now();
        checkpoint.validate().map_err(CheckpointError::Invalid)?;

        self.store.write(&checkpoint)?;
        Ok(checkpoint)
    }

    /// Replace one phase entry with `phase`.
    pub fn update_phase(&self, phase: &Phase) -> Result<Checkpoint, CheckpointError> {
        if !phase::is_valid_phase(phase.phase_number) {
            return Err(CheckpointError::UnknownPhase(phase.phase_number));
        }
        self.update(|cp| {
            let slot = cp
                .phase_progress
                .iter_mut()
                .find(|p| p.phase_number == phase.phase_number)
                .ok_or(CheckpointError::UnknownPhase(phase.phase_number))?;
            *slot = phase.clone();
            Ok(())
        })
    }

    pub fn update_component(
        &self,
        name: &str,
        state: ComponentState,
    ) -> Result<Checkpoint, CheckpointError> {
        self.update(|cp| {
            cp.component_states.insert(name.to_string(), state);
            Ok(())
        })
    }

    pub fn mark_stopped(
        &self,
        reason: &str,
        details: Option<String>,
        can_auto_resume: bool,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.update(|cp| {
            cp.status = CheckpointStatus::Stopped;
            cp.stopping_context = Some(StoppingContext {
                reason: reason.to_string(),
                details,
                can_auto_resume,
                stopped_at: Utc::now(),
            });
            Ok(())
        })?;
        info!(id = %checkpoint.orchestration_id, reason, "Checkpoint stopped");
        Ok(checkpoint)
    }

    pub fn mark_completed(&self) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.update(|cp| {
            cp.status = CheckpointStatus::Completed;
            cp.stopping_context = None;
            Ok(())
        })?;
        info!(id = %checkpoint.orchestration_id, "Checkpoint completed");
        Ok(checkpoint)
    }

    /// Stopped -> InProgress. Resuming a running orchestration is a no-op.
    pub fn mark_resumed(&self) -> Result<Checkpoint, CheckpointError> {
        self.update(|cp| match cp.status {
            CheckpointStatus::Stopped => {
                cp.status = CheckpointStatus::InProgress;
                cp.stopping_context = None;
                cp.resumed_at.push(Utc::now());
                Ok(())
            }
            CheckpointStatus::InProgress => Ok(()),
            CheckpointStatus::Completed => Err(CheckpointError::Invalid(
                "orchestration already completed".to_string(),
            )),
        })
    }

    /// Repair a corrupted checkpoint in place.
    ///
    /// The corrupted original is backed up before being overwritten. Fails
    /// with `Unrecoverable` when no candidate passes full validation.
    pub fn recover(&self) -> Result<RecoveryReport, CheckpointError> {
        self.recover_inner(true)
    }

    /// What `recover` would produce, without touching the file.
    pub fn preview_recovery(&self) -> Result<RecoveryReport, CheckpointError> {
        self.recover_inner(false)
    }

    fn recover_inner(&self, persist: bool) -> Result<RecoveryReport, CheckpointError> {
        let _lock = self.store.lock()?;
        let text = self
            .store
            .read_text()?
            .ok_or_else(|| CheckpointError::Missing(self.path().to_path_buf()))?;

        if let Ok(checkpoint) = parse_checkpoint(&text) {
            return Ok(RecoveryReport {
                checkpoint,
                strategy: None,
                backup_path: None,
            });
        }

        let Some((value, strategy)) = repair::repair(&text, |v| checkpoint_from_value(v).is_ok())
        else {
            warn!(path = %self.path().display(), "Checkpoint could not be repaired");
            return Err(CheckpointError::Unrecoverable(
                "no structurally valid checkpoint found in file".to_string(),
            ));
        };
        let checkpoint = checkpoint_from_value(&value).map_err(CheckpointError::Unrecoverable)?;

        if !persist {
            return Ok(RecoveryReport {
                checkpoint,
                strategy: Some(strategy),
                backup_path: None,
            });
        }

        let backup = self.store.backup_corrupt()?;
        self.store.write(&checkpoint)?;
        warn!(
            id = %checkpoint.orchestration_id,
            strategy = %strategy,
            backup = %backup.display(),
            "Recovered corrupt checkpoint"
        );

        Ok(RecoveryReport {
            checkpoint,
            strategy: Some(strategy),
            backup_path: Some(backup),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::model::ComponentStatus;
    use crate::phase::{GateOutcome, PhaseStatus};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn store() -> (CheckpointStore, TempDir) {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::open(
            dir.path().join(".pipewright/checkpoint.json"),
            dir.path().to_path_buf(),
        );
        (store, dir)
    }

    #[test]
    fn test_load_missing() {
        let (store, _dir) = store();
        assert!(matches!(store.load(), LoadOutcome::Missing));
        assert!(matches!(store.load_valid(), Err(CheckpointError::Missing(_))));
    }

    #[test]
    fn test_create_then_load_round_trip() {
        let (store, _dir) = store();
        let created = store
            .create("build it", &[], &["api".into(), "worker".into()])
            .unwrap();
        let LoadOutcome::Valid(loaded) = store.load() else {
            panic!("expected a valid checkpoint");
        };
        assert_eq!(loaded.orchestration_id, created.orchestration_id);
        assert_eq!(
            loaded.phase_progress.iter().map(|p| p.status).collect::<Vec<_>>(),
            vec![PhaseStatus::NotStarted; 6]
        );
        assert_eq!(*loaded, created);
    }

    #[test]
    fn test_create_records_spec_digests() {
        let (store, dir) = store();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/spec.md"), "abc").unwrap();
        let cp = store
            .create("x", &[dir.path().join("docs/spec.md")], &[])
            .unwrap();
        let spec = &cp.original_request.spec_files[0];
        assert_eq!(spec.path, "docs/spec.md");
        assert_eq!(
            spec.sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_update_phase_and_component() {
        let (store, _dir) = store();
        let created = store.create("x", &[], &["api".into()]).unwrap();

        let mut phase = Phase::new(1);
        phase.start(Utc::now());
        phase.apply_gate(&GateOutcome::Passed, Utc::now());
        store.update_phase(&phase).unwrap();

        let cp = store
            .update_component(
                "api",
                ComponentState {
                    status: ComponentStatus::Completed,
                    last_commit: Some("abc123".into()),
                    tests_passing: Some(true),
                },
            )
            .unwrap();

        assert_eq!(cp.phase(1).unwrap().status, PhaseStatus::Completed);
        assert_eq!(cp.resume_phase(), Some(2));
        assert_eq!(cp.component_states["api"].last_commit.as_deref(), Some("abc123"));
        assert!(cp.last_updated >= created.last_updated);
        assert_eq!(cp.original_request, created.original_request);
    }

    #[test]
    fn test_update_phase_rejects_unknown_phase() {
        let (store, _dir) = store();
        store.create("x", &[], &[]).unwrap();
        let err = store.update_phase(&Phase::new(9)).unwrap_err();
        assert!(matches!(err, CheckpointError::UnknownPhase(9)));
    }

    #[test]
    fn test_stop_resume_complete_lifecycle() {
        let (store, _dir) = store();
        store.create("x", &[], &[]).unwrap();

        let stopped = store
            .mark_stopped("operator interrupt", Some("ctrl-c".into()), true)
            .unwrap();
        assert_eq!(stopped.status, CheckpointStatus::Stopped);
        assert!(stopped.stopping_context.as_ref().unwrap().can_auto_resume);

        let resumed = store.mark_resumed().unwrap();
        assert_eq!(resumed.status, CheckpointStatus::InProgress);
        assert!(resumed.stopping_context.is_none());
        assert_eq!(resumed.resumed_at.len(), 1);

        let done = store.mark_completed().unwrap();
        assert_eq!(done.status, CheckpointStatus::Completed);
        assert!(store.mark_resumed().is_err());
    }

    #[test]
    fn test_update_without_checkpoint_fails() {
        let (store, _dir) = store();
        assert!(matches!(
            store.mark_completed(),
            Err(CheckpointError::Missing(_))
        ));
    }

    #[test]
    fn test_invalid_file_reports_reason() {
        let (store, _dir) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), r#"{"orchestration_id": "x"}"#).unwrap();
        match store.load() {
            LoadOutcome::Invalid { reason } => assert!(!reason.is_empty()),
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_recover_truncated_checkpoint_keeps_id() {
        let (store, _dir) = store();
        let created = store.create("x", &[], &["api".into()]).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();

        // Strip every trailing '}' (and whitespace) the way a torn write would.
        let truncated = text.trim_end().trim_end_matches(['}', '\n', ' ']);
        fs::write(store.path(), truncated).unwrap();
        assert!(matches!(store.load(), LoadOutcome::Invalid { .. }));

        match store.recover() {
            Ok(report) => {
                assert_eq!(report.checkpoint.orchestration_id, created.orchestration_id);
                assert!(report.checkpoint.validate().is_ok());
                assert!(report.backup_path.as_ref().unwrap().exists());
                assert!(matches!(store.load(), LoadOutcome::Valid(_)));
            }
            Err(e) => assert!(matches!(e, CheckpointError::Unrecoverable(_))),
        }
    }

    #[test]
    fn test_preview_recovery_leaves_file_alone() {
        let (store, _dir) = store();
        store.create("first", &[], &[]).unwrap();
        let text = fs::read_to_string(store.path()).unwrap();
        let corrupt = format!("{}{{\"orchestration_id\": ", text);
        fs::write(store.path(), &corrupt).unwrap();

        let report = store.preview_recovery().unwrap();
        assert!(report.strategy.is_some());
        assert!(report.backup_path.is_none());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), corrupt);
    }

    #[test]
    fn test_recover_duplicated_content() {
        let (store, _dir) = store();
        let first = store.create("first", &[], &[]).unwrap();
        let first_text = fs::read_to_string(store.path()).unwrap();
        let second = store.create("second", &[], &[]).unwrap();
        let second_text = fs::read_to_string(store.path()).unwrap();

        fs::write(store.path(), format!("{}{}", first_text, second_text)).unwrap();
        let report = store.recover().unwrap();
        assert_eq!(report.strategy, Some(RepairStrategy::LastCompleteObject));
        assert_eq!(report.checkpoint.orchestration_id, second.orchestration_id);
        assert_ne!(report.checkpoint.orchestration_id, first.orchestration_id);
    }

    #[test]
    fn test_recover_garbage_fails() {
        let (store, _dir) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{\"orchestration_id\": \"x\", \"garbage").unwrap();
        assert!(matches!(
            store.recover(),
            Err(CheckpointError::Unrecoverable(_))
        ));
    }

    #[test]
    fn test_recover_valid_file_is_untouched() {
        let (store, _dir) = store();
        store.create("x", &[], &[]).unwrap();
        let report = store.recover().unwrap();
        assert!(report.strategy.is_none());
        assert!(report.backup_path.is_none());
    }
}
