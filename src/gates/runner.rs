use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::log::{GateLog, GateRecord, GateTrigger};
use crate::checkpoint::{CheckpointStatus, CheckpointStore, LoadOutcome};
use crate::config::Config;
use crate::errors::GateError;
use crate::phase::{self, GateOutcome, Phase, PhaseLedger};
use crate::store::JsonStore;
use crate::subprocess;
use crate::util::truncate_output;

/// Per-stream limit on checker output kept in the gate log.
pub const MAX_GATE_OUTPUT_BYTES: usize = 4096;

/// Outcome of one `run_gate` call.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub record: GateRecord,
    pub outcome: GateOutcome,
    /// The phase as persisted after the gate
    pub phase: Phase,
}

impl GateResult {
    /// Whether the pipeline may move past this phase.
    pub fn advanced(&self) -> bool {
        !matches!(self.outcome, GateOutcome::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseGateStatus {
    pub phase: Phase,
    pub checker: Option<String>,
    pub blocking: bool,
    pub last_record: Option<GateRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateStatusReport {
    pub current_phase: u8,
    pub last_completed_phase: u8,
    pub phases: Vec<PhaseGateStatus>,
}

/// Sequences the six phase gates.
#[derive(Debug, Clone)]
pub struct GateRunner {
    config: Config,
    ledger: JsonStore<PhaseLedger>,
    log: GateLog,
    checkpoints: CheckpointStore,
}

impl GateRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            ledger: JsonStore::new(config.phases_file.clone()),
            log: GateLog::open(config.gate_log_file.clone()),
            checkpoints: CheckpointStore::new(config),
            config: config.clone(),
        }
    }

    pub fn log(&self) -> &GateLog {
        &self.log
    }

    pub fn ledger(&self) -> Result<PhaseLedger, GateError> {
        Ok(self.ledger.load()?)
    }

    pub fn current_phase(&self) -> Result<u8, GateError> {
        Ok(self.ledger()?.current_phase())
    }

    /// Whether `phase` is recorded Passed in the ledger.
    pub fn gate_passed(&self, phase: u8) -> Result<bool, GateError> {
        Ok(self.ledger()?.gate_passed(phase))
    }

    /// Must be called with the ledger as read under its lock.
    fn check_sequence(ledger: &PhaseLedger, phase: u8, force: bool) -> Result<(), GateError> {
        if !phase::is_valid_phase(phase) {
            return Err(GateError::InvalidPhase(phase));
        }
        if phase > 1 && !force && !ledger.gate_passed(phase - 1) {
            return Err(GateError::PreviousGateNotPassed {
                phase,
                previous: phase - 1,
            });
        }
        Ok(())
    }

    /// Mark a phase InProgress. Phase N+1 cannot start before gate N has passed.
    pub fn start_phase(&self, phase: u8, force: bool) -> Result<Phase, GateError> {
        let started = self.ledger.update(|ledger| {
            Self::check_sequence(ledger, phase, force)?;
            let p = ledger.get_mut(phase);
            p.start(Utc::now());
            Ok::<_, GateError>(p.clone())
        })?;
        info!(phase, name = %started.name, "Phase started");
        self.mirror(&started);
        Ok(started)
    }

    /// Run the checker for `phase` and record the result.
    pub async fn run_gate(
        &self,
        phase: u8,
        trigger: GateTrigger,
        force: bool,
    ) -> Result<GateResult, GateError> {
        // Fail fast before running the checker; rechecked when the result is applied.
        Self::check_sequence(&self.ledger()?, phase, force)?;

        let checker = self.config.settings.checker_for(phase).cloned();
        let now = Utc::now();

        let record = match &checker {
            None => {
                info!(phase, "No checker registered, gate passes vacuously");
                GateRecord {
                    gate_id: Uuid::new_v4(),
                    phase,
                    timestamp: now,
                    passed: true,
                    blocking: true,
                    checker: None,
                    exit_code: None,
                    timed_out: false,
                    duration_ms: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                    trigger,
                    forced: force,
                }
            }
            Some(checker) => {
                let timeout = checker
                    .timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| self.config.gate_timeout());
                let phase_env = phase.to_string();
                let output = subprocess::run_shell(
                    &checker.command,
                    &self.config.project_dir,
                    timeout,
                    &[("PIPEWRIGHT_PHASE", phase_env.as_str())],
                )
                .await
                .map_err(|source| GateError::CheckerSpawn { phase, source })?;

                GateRecord {
                    gate_id: Uuid::new_v4(),
                    phase,
                    timestamp: now,
                    passed: output.success(),
                    blocking: checker.blocking,
                    checker: Some(checker.command.clone()),
                    exit_code: Some(output.exit_code),
                    timed_out: output.timed_out,
                    duration_ms: output.duration.as_millis() as u64,
                    stdout: truncate_output(&output.stdout, MAX_GATE_OUTPUT_BYTES),
                    stderr: truncate_output(&output.stderr, MAX_GATE_OUTPUT_BYTES),
                    trigger,
                    forced: force,
                }
            }
        };

        let outcome = if record.passed {
            GateOutcome::Passed
        } else if record.blocking {
            GateOutcome::Failed
        } else {
            GateOutcome::Waived {
                warning: format!(
                    "advisory gate failed at {} ({})",
                    record.timestamp.to_rfc3339(),
                    describe_failure(&record)
                ),
            }
        };

        let (updated, all_passed) = self.ledger.update(|ledger| {
            Self::check_sequence(ledger, phase, force)?;
            ledger.apply_gate(phase, &outcome, Utc::now());
            let updated = ledger.get_mut(phase).clone();
            Ok::<_, GateError>((updated, ledger.current_phase() as usize > phase::PHASE_COUNT))
        })?;
        self.log.append(record.clone())?;

        match &outcome {
            GateOutcome::Passed => info!(phase, trigger = %trigger, "Gate passed"),
            GateOutcome::Failed => warn!(
                phase,
                trigger = %trigger,
                failure = %describe_failure(&record),
                "Gate failed"
            ),
            GateOutcome::Waived { warning } => {
                warn!(phase, trigger = %trigger, warning = %warning, "Advisory gate failed")
            }
        }

        self.mirror(&updated);
        if all_passed {
            self.complete_checkpoint();
        }

        Ok(GateResult {
            record,
            outcome,
            phase: updated,
        })
    }

    /// Ledger plus the latest record and checker for each phase.
    pub fn status(&self) -> Result<GateStatusReport, GateError> {
        let ledger = self.ledger()?;
        let records = self.log.records()?;

        let phases = ledger
            .phases
            .iter()
            .map(|p| {
                let checker = self.config.settings.checker_for(p.phase_number);
                PhaseGateStatus {
                    phase: p.clone(),
                    checker: checker.map(|c| c.command.clone()),
                    blocking: checker.is_none_or(|c| c.blocking),
                    last_record: records
                        .iter()
                        .rev()
                        .find(|r| r.phase == p.phase_number)
                        .cloned(),
                }
            })
            .collect();

        Ok(GateStatusReport {
            current_phase: ledger.current_phase(),
            last_completed_phase: ledger.last_completed_phase,
            phases,
        })
    }

    /// Copy a phase into the checkpoint. Missing or invalid checkpoints are skipped.
    fn mirror(&self, phase: &Phase) {
        match self.checkpoints.load() {
            LoadOutcome::Valid(_) => {
                if let Err(e) = self.checkpoints.update_phase(phase) {
                    warn!(phase = phase.phase_number, error = %e, "Failed to mirror phase into checkpoint");
                }
            }
            LoadOutcome::Missing => {}
            LoadOutcome::Invalid { reason } => {
                warn!(reason = %reason, "Checkpoint invalid, phase not mirrored");
            }
        }
    }

    fn complete_checkpoint(&self) {
        if let LoadOutcome::Valid(cp) = self.checkpoints.load()
            && cp.status == CheckpointStatus::InProgress
            && let Err(e) = self.checkpoints.mark_completed()
        {
            warn!(error = %e, "Failed to mark checkpoint completed");
        }
    }
}

fn describe_failure(record: &GateRecord) -> String {
    if record.timed_out {
        "timed out".to_string()
    } else {
        match record.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "no exit code".to_string(),
        }
    }
}
