//! The six ordered phases of a pipeline run and the ledger that tracks them.
//!
//! Phase N+1 may only start once phase N's gate has passed. The ledger lives in
//! `.pipewright/phases.json` and is mirrored into the checkpoint when one exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Number of phases in a pipeline run.
pub const PHASE_COUNT: usize = 6;

/// Phase names, indexed by `phase_number - 1`.
pub const PHASE_NAMES: [&str; PHASE_COUNT] = [
    "Specification Analysis",
    "Architecture",
    "Task Planning",
    "Scaffolding",
    "Implementation",
    "Integration & Verification",
];

/// Phase whose gate fires when the task queue is drained.
pub const IMPLEMENTATION_PHASE: u8 = 5;
/// Phase whose gate fires once the implementation gate has passed.
pub const VERIFICATION_PHASE: u8 = 6;

/// Key in [`Phase::outputs`] under which waived advisory failures are listed.
pub const GATE_WARNINGS_KEY: &str = "gate_warnings";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Incomplete,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::NotStarted => write!(f, "not started"),
            PhaseStatus::InProgress => write!(f, "in progress"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed,
    #[default]
    Unset,
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStatus::Passed => write!(f, "passed"),
            GateStatus::Failed => write!(f, "failed"),
            GateStatus::Unset => write!(f, "-"),
        }
    }
}

/// How a gate execution resolves for its phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Passed,
    Failed,
    /// An advisory checker failed; the phase advances with a warning.
    Waived { warning: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub phase_number: u8,
    pub name: String,
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub gate_status: GateStatus,
}

impl Phase {
    pub fn new(phase_number: u8) -> Self {
        Self {
            phase_number,
            name: phase_name(phase_number).unwrap_or("Unknown").to_string(),
            status: PhaseStatus::NotStarted,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            outputs: BTreeMap::new(),
            gate_status: GateStatus::Unset,
        }
    }

    /// A phase that still has work left: not started, running, or failed verification.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.status,
            PhaseStatus::NotStarted | PhaseStatus::InProgress | PhaseStatus::Incomplete
        )
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        if self.status != PhaseStatus::InProgress {
            self.started_at = Some(now);
        }
        self.status = PhaseStatus::InProgress;
        self.completed_at = None;
        self.duration_ms = None;
    }

    /// Apply a gate result to this phase.
    pub fn apply_gate(&mut self, outcome: &GateOutcome, now: DateTime<Utc>) {
        match outcome {
            GateOutcome::Passed | GateOutcome::Waived { .. } => {
                self.gate_status = GateStatus::Passed;
                self.status = PhaseStatus::Completed;
                self.completed_at = Some(now);
                self.duration_ms = self
                    .started_at
                    .map(|start| (now - start).num_milliseconds().max(0) as u64);
            }
            GateOutcome::Failed => {
                self.gate_status = GateStatus::Failed;
                self.status = PhaseStatus::Incomplete;
                self.completed_at = None;
                self.duration_ms = None;
            }
        }

        if let GateOutcome::Waived { warning } = outcome {
            let entry = self
                .outputs
                .entry(GATE_WARNINGS_KEY.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = entry {
                items.push(Value::String(warning.clone()));
            } else {
                *entry = Value::Array(vec![Value::String(warning.clone())]);
            }
        }
    }
}

pub fn phase_name(phase_number: u8) -> Option<&'static str> {
    phase_number
        .checked_sub(1)
        .and_then(|i| PHASE_NAMES.get(i as usize))
        .copied()
}

pub fn is_valid_phase(phase_number: u8) -> bool {
    (1..=PHASE_COUNT as u8).contains(&phase_number)
}

/// All six phases in order, NotStarted.
pub fn default_phases() -> Vec<Phase> {
    (1..=PHASE_COUNT as u8).map(Phase::new).collect()
}

/// Highest passed phase + 1. Returns `PHASE_COUNT + 1` once every gate has passed.
pub fn current_phase(phases: &[Phase]) -> u8 {
    phases
        .iter()
        .filter(|p| p.gate_status == GateStatus::Passed)
        .map(|p| p.phase_number)
        .max()
        .unwrap_or(0)
        + 1
}

/// First phase that still has work left, if any.
pub fn resume_phase(phases: &[Phase]) -> Option<u8> {
    phases
        .iter()
        .find(|p| p.is_resumable())
        .map(|p| p.phase_number)
}

/// Persisted phase state (`phases.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseLedger {
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub last_completed_phase: u8,
}

impl Default for PhaseLedger {
    fn default() -> Self {
        Self {
            phases: default_phases(),
            last_completed_phase: 0,
        }
    }
}

impl PhaseLedger {
    pub fn get(&self, phase_number: u8) -> Option<&Phase> {
        self.phases.iter().find(|p| p.phase_number == phase_number)
    }

    /// Mutable access, recreating the entry if the file lost it.
    pub fn get_mut(&mut self, phase_number: u8) -> &mut Phase {
        if let Some(i) = self.phases.iter().position(|p| p.phase_number == phase_number) {
            return &mut self.phases[i];
        }
        self.phases.push(Phase::new(phase_number));
        self.phases.sort_by_key(|p| p.phase_number);
        let i = self
            .phases
            .iter()
            .position(|p| p.phase_number == phase_number)
            .unwrap_or(self.phases.len() - 1);
        &mut self.phases[i]
    }

    pub fn gate_passed(&self, phase_number: u8) -> bool {
        self.get(phase_number)
            .is_some_and(|p| p.gate_status == GateStatus::Passed)
    }

    pub fn current_phase(&self) -> u8 {
        current_phase(&self.phases)
    }

    pub fn apply_gate(&mut self, phase_number: u8, outcome: &GateOutcome, now: DateTime<Utc>) {
        self.get_mut(phase_number).apply_gate(outcome, now);
        self.last_completed_phase = self
            .phases
            .iter()
            .filter(|p| p.gate_status == GateStatus::Passed)
            .map(|p| p.phase_number)
            .max()
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_phases_are_ordered_and_named() {
        let phases = default_phases();
        assert_eq!(phases.len(), 6);
        assert_eq!(phases[0].name, "Specification Analysis");
        assert_eq!(phases[5].name, "Integration & Verification");
        assert!(phases.iter().enumerate().all(|(i, p)| p.phase_number as usize == i + 1));
        assert!(phases.iter().all(|p| p.status == PhaseStatus::NotStarted));
    }

    #[test]
    fn test_phase_name_bounds() {
        assert_eq!(phase_name(0), None);
        assert_eq!(phase_name(3), Some("Task Planning"));
        assert_eq!(phase_name(7), None);
        assert!(!is_valid_phase(0));
        assert!(is_valid_phase(6));
        assert!(!is_valid_phase(7));
    }

    #[test]
    fn test_current_phase() {
        let mut ledger = PhaseLedger::default();
        assert_eq!(ledger.current_phase(), 1);
        let now = Utc::now();
        ledger.apply_gate(1, &GateOutcome::Passed, now);
        ledger.apply_gate(2, &GateOutcome::Passed, now);
        assert_eq!(ledger.current_phase(), 3);
        assert_eq!(ledger.last_completed_phase, 2);
        for n in 3..=6 {
            ledger.apply_gate(n, &GateOutcome::Passed, now);
        }
        assert_eq!(ledger.current_phase(), 7);
    }

    #[test]
    fn test_apply_gate_records_duration() {
        let mut phase = Phase::new(1);
        let start = Utc::now();
        phase.start(start);
        phase.apply_gate(&GateOutcome::Passed, start + Duration::seconds(3));
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert_eq!(phase.duration_ms, Some(3000));
    }

    #[test]
    fn test_failed_gate_marks_incomplete() {
        let mut phase = Phase::new(2);
        phase.start(Utc::now());
        phase.apply_gate(&GateOutcome::Failed, Utc::now());
        assert_eq!(phase.gate_status, GateStatus::Failed);
        assert_eq!(phase.status, PhaseStatus::Incomplete);
        assert!(phase.is_resumable());
    }

    #[test]
    fn test_waived_gate_passes_with_warning() {
        let mut phase = Phase::new(6);
        phase.apply_gate(
            &GateOutcome::Waived {
                warning: "lint failed".into(),
            },
            Utc::now(),
        );
        phase.apply_gate(
            &GateOutcome::Waived {
                warning: "lint failed again".into(),
            },
            Utc::now(),
        );
        assert_eq!(phase.gate_status, GateStatus::Passed);
        let warnings = phase.outputs[GATE_WARNINGS_KEY].as_array().unwrap();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_resume_phase() {
        let mut phases = default_phases();
        let now = Utc::now();
        phases[0].apply_gate(&GateOutcome::Passed, now);
        phases[1].start(now);
        assert_eq!(resume_phase(&phases), Some(2));
        for p in phases.iter_mut() {
            p.apply_gate(&GateOutcome::Passed, now);
        }
        assert_eq!(resume_phase(&phases), None);
    }

    #[test]
    fn test_get_mut_restores_missing_phase() {
        let mut ledger = PhaseLedger {
            phases: vec![Phase::new(1)],
            last_completed_phase: 0,
        };
        ledger.get_mut(4).start(Utc::now());
        assert_eq!(ledger.phases.len(), 2);
        assert_eq!(ledger.get(4).unwrap().status, PhaseStatus::InProgress);
    }
}
