use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::phase::{self, PHASE_COUNT, Phase};

/// Schema version written by, and required by, this build.
pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Stopped,
    Completed,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointStatus::InProgress => write!(f, "in progress"),
            CheckpointStatus::Stopped => write!(f, "stopped"),
            CheckpointStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A spec file as it was when the orchestration started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecFile {
    /// Path relative to the project root
    pub path: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// What the operator asked for. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalRequest {
    pub prompt: String,
    #[serde(default)]
    pub spec_files: Vec<SpecFile>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::str::FromStr for ComponentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(ComponentStatus::Pending),
            "in_progress" => Ok(ComponentStatus::InProgress),
            "completed" => Ok(ComponentStatus::Completed),
            "failed" => Ok(ComponentStatus::Failed),
            other => Err(format!("unknown component status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentState {
    #[serde(default)]
    pub status: ComponentStatus,
    #[serde(default)]
    pub last_commit: Option<String>,
    #[serde(default)]
    pub tests_passing: Option<bool>,
}

/// Why an orchestration stopped. Present only while the checkpoint is Stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppingContext {
    pub reason: String,
    #[serde(default)]
    pub details: Option<String>,
    pub can_auto_resume: bool,
    pub stopped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub orchestration_id: String,
    pub schema_version: String,
    pub status: CheckpointStatus,
    pub original_request: OriginalRequest,
    pub phase_progress: Vec<Phase>,
    #[serde(default)]
    pub component_states: BTreeMap<String, ComponentState>,
    #[serde(default)]
    pub stopping_context: Option<StoppingContext>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Times this orchestration was resumed after a stop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resumed_at: Vec<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(request: OriginalRequest, components: &[String], now: DateTime<Utc>) -> Self {
        Self {
            orchestration_id: new_orchestration_id(now),
            schema_version: SCHEMA_VERSION.to_string(),
            status: CheckpointStatus::InProgress,
            original_request: request,
            phase_progress: phase::default_phases(),
            component_states: components
                .iter()
                .map(|c| (c.clone(), ComponentState::default()))
                .collect(),
            stopping_context: None,
            created_at: now,
            last_updated: now,
            resumed_at: Vec::new(),
        }
    }

    /// Structural checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(format!(
                "schema_version {} does not match expected {}",
                self.schema_version, SCHEMA_VERSION
            ));
        }
        if self.orchestration_id.trim().is_empty() {
            return Err("orchestration_id is empty".to_string());
        }
        if self.phase_progress.len() != PHASE_COUNT {
            return Err(format!(
                "expected {} phases, found {}",
                PHASE_COUNT,
                self.phase_progress.len()
            ));
        }
        for (i, p) in self.phase_progress.iter().enumerate() {
            if p.phase_number as usize != i + 1 {
                return Err(format!(
                    "phase at position {} has number {}",
                    i + 1,
                    p.phase_number
                ));
            }
        }
        match (self.status, &self.stopping_context) {
            (CheckpointStatus::Stopped, None) => {
                Err("status is stopped but stopping_context is missing".to_string())
            }
            (CheckpointStatus::InProgress | CheckpointStatus::Completed, Some(_)) => {
                Err(format!("stopping_context set while status is {}", self.status))
            }
            _ => Ok(()),
        }
    }

    pub fn phase(&self, phase_number: u8) -> Option<&Phase> {
        self.phase_progress
            .iter()
            .find(|p| p.phase_number == phase_number)
    }

    pub fn resume_phase(&self) -> Option<u8> {
        phase::resume_phase(&self.phase_progress)
    }

    pub fn current_phase(&self) -> u8 {
        phase::current_phase(&self.phase_progress)
    }
}

/// `orch-<utc timestamp>-<8 hex>`: sortable by start time, random suffix against collisions.
pub fn new_orchestration_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("orch-{}-{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// Parse and validate checkpoint text.
pub fn parse_checkpoint(text: &str) -> Result<Checkpoint, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    checkpoint_from_value(&value)
}

pub fn checkpoint_from_value(value: &serde_json::Value) -> Result<Checkpoint, String> {
    if let Some(version) = value.get("schema_version").and_then(|v| v.as_str())
        && version != SCHEMA_VERSION
    {
        return Err(format!(
            "schema_version {} does not match expected {}",
            version, SCHEMA_VERSION
        ));
    }
    let checkpoint: Checkpoint =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    checkpoint.validate()?;
    Ok(checkpoint)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
