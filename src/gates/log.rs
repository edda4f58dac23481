use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::store::JsonStore;

/// What caused a gate to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTrigger {
    Manual,
    /// The task queue reached 100% complete
    QueueComplete,
    /// The previous phase's gate passed
    PreviousGatePassed,
}

impl std::fmt::Display for GateTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateTrigger::Manual => write!(f, "manual"),
            GateTrigger::QueueComplete => write!(f, "queue complete"),
            GateTrigger::PreviousGatePassed => write!(f, "previous gate passed"),
        }
    }
}

/// One gate execution. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRecord {
    pub gate_id: Uuid,
    pub phase: u8,
    pub timestamp: DateTime<Utc>,
    pub passed: bool,
    pub blocking: bool,
    /// `None` when no checker is registered (vacuous pass)
    #[serde(default)]
    pub checker: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub trigger: GateTrigger,
    /// Run with the previous-gate check bypassed
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateLogFile {
    #[serde(default)]
    pub records: Vec<GateRecord>,
}

/// Append-only gate execution log (`gate-log.json`).
#[derive(Debug, Clone)]
pub struct GateLog {
    store: JsonStore<GateLogFile>,
}

impl GateLog {
    pub fn open(path: PathBuf) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    pub fn append(&self, record: GateRecord) -> Result<(), StoreError> {
        self.store.update(|log| {
            log.records.push(record);
            Ok::<_, StoreError>(())
        })
    }

    pub fn records(&self) -> Result<Vec<GateRecord>, StoreError> {
        Ok(self.store.load()?.records)
    }

    pub fn for_phase(&self, phase: u8) -> Result<Vec<GateRecord>, StoreError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.phase == phase)
            .collect())
    }

    pub fn last_for_phase(&self, phase: u8) -> Result<Option<GateRecord>, StoreError> {
        Ok(self.for_phase(phase)?.pop())
    }

    /// Whether the checker for `phase` has ever passed.
    pub fn ever_passed(&self, phase: u8) -> Result<bool, StoreError> {
        Ok(self.records()?.iter().any(|r| r.phase == phase && r.passed))
    }
}
