//! Reconstructing probable progress when no usable checkpoint exists.
//!
//! Evidence comes from five independent sources: component directories, the
//! test suite, the gate log, the git log and the task queue. Each source that
//! yields nothing lowers the confidence of the inferred phase.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::consistency::component_dirs;
use crate::config::Config;
use crate::ecosystem::{EcosystemRegistry, TestSummary};
use crate::gates::GateLog;
use crate::phase::{IMPLEMENTATION_PHASE, PHASE_COUNT, VERIFICATION_PHASE};
use crate::subprocess::run_shell;
use crate::task::{Progress, TaskQueue};
use crate::tracker::{CommitSummary, GitTracker};

/// Commits inspected from the git log.
const GIT_LOG_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Confidence given how many of the five evidence sources came up empty.
    pub fn from_missing(missing: usize) -> Self {
        match missing {
            0 | 1 => Confidence::High,
            2 | 3 => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "high"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestEvidence {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<String>,
    pub passed: bool,
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TestSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredState {
    pub components: Vec<String>,
    pub tests: Option<TestEvidence>,
    /// Phases whose gate passed, as a contiguous run from phase 1
    pub gates_passed: Vec<u8>,
    pub recent_commits: Vec<CommitSummary>,
    pub task_progress: Option<Progress>,
    pub inferred_phase: u8,
    pub progress_percentage: f64,
    pub confidence: Confidence,
    /// Evidence sources that yielded nothing
    pub missing_evidence: Vec<String>,
}

impl DiscoveredState {
    /// All six gates passed; there is nothing left to resume.
    pub fn is_complete(&self) -> bool {
        self.gates_passed.len() == PHASE_COUNT
    }
}

/// Gather evidence from the project and infer where the pipeline stands.
pub async fn discover(config: &Config, ecosystems: &EcosystemRegistry) -> Result<DiscoveredState> {
    let mut missing = Vec::new();

    let components = component_dirs(&config.components_dir());
    if components.is_empty() {
        missing.push("component directories".to_string());
    }

    let tests = run_tests(config, ecosystems).await;
    if tests.is_none() {
        missing.push("test results".to_string());
    }

    let gates_passed = contiguous_passed_gates(&GateLog::open(config.gate_log_file.clone()));
    if gates_passed.is_empty() {
        missing.push("gate history".to_string());
    }

    let recent_commits = match GitTracker::discover(&config.project_dir) {
        Some(git) => git.recent_log(GIT_LOG_LIMIT).unwrap_or_else(|e| {
            warn!(error = %e, "Could not read git log");
            Vec::new()
        }),
        None => Vec::new(),
    };
    if recent_commits.is_empty() {
        missing.push("git history".to_string());
    }

    let task_progress = match TaskQueue::new(config).progress() {
        Ok(p) if p.total > 0 => Some(p),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Could not read task queue");
            None
        }
    };
    if task_progress.is_none() {
        missing.push("task queue".to_string());
    }

    let has_specs = config.spec_files().map(|s| !s.is_empty()).unwrap_or(false);
    let inferred_phase = infer_phase(
        &gates_passed,
        has_specs,
        !components.is_empty(),
        task_progress.as_ref(),
        tests.as_ref().is_some_and(|t| t.passed),
        !recent_commits.is_empty(),
    );
    let progress_percentage =
        progress_percentage(inferred_phase, &gates_passed, task_progress.as_ref());
    let confidence = Confidence::from_missing(missing.len());

    info!(
        phase = inferred_phase,
        percentage = progress_percentage,
        %confidence,
        "State discovery finished"
    );

    Ok(DiscoveredState {
        components,
        tests,
        gates_passed,
        recent_commits,
        task_progress,
        inferred_phase,
        progress_percentage,
        confidence,
        missing_evidence: missing,
    })
}

async fn run_tests(config: &Config, ecosystems: &EcosystemRegistry) -> Option<TestEvidence> {
    let ecosystem = ecosystems.detect(&config.project_dir);
    let command = config
        .settings
        .project
        .test_command
        .clone()
        .or_else(|| ecosystem.and_then(|e| e.test_command()).map(str::to_string))?;

    debug!(%command, "Running test suite for state discovery");
    match run_shell(&command, &config.project_dir, config.test_timeout(), &[]).await {
        Ok(output) => {
            let combined = format!("{}\n{}", output.stdout, output.stderr);
            Some(TestEvidence {
                summary: ecosystem.and_then(|e| e.parse_test_summary(&combined)),
                ecosystem: ecosystem.map(|e| e.name().to_string()),
                passed: output.success(),
                timed_out: output.timed_out,
                command,
            })
        }
        Err(e) => {
            warn!(%command, error = %e, "Could not run test suite");
            None
        }
    }
}

fn contiguous_passed_gates(log: &GateLog) -> Vec<u8> {
    let mut passed = Vec::new();
    for phase in 1..=PHASE_COUNT as u8 {
        match log.ever_passed(phase) {
            Ok(true) => passed.push(phase),
            Ok(false) => break,
            Err(e) => {
                warn!(error = %e, "Could not read gate log");
                break;
            }
        }
    }
    passed
}

/// The phase most likely in progress.
///
/// Gate history is authoritative; the other evidence can only move the
/// estimate forward from there.
pub fn infer_phase(
    gates_passed: &[u8],
    has_specs: bool,
    has_components: bool,
    tasks: Option<&Progress>,
    tests_passing: bool,
    has_commits: bool,
) -> u8 {
    let from_gates = gates_passed
        .last()
        .map(|p| (p + 1).min(PHASE_COUNT as u8))
        .unwrap_or(1);

    let from_evidence = if tasks.is_some_and(|t| t.is_complete()) && tests_passing {
        VERIFICATION_PHASE
    } else if has_components && tasks.is_some() {
        IMPLEMENTATION_PHASE
    } else if has_components || tasks.is_some() {
        4
    } else if has_specs && has_commits {
        2
    } else {
        1
    };

    from_gates.max(from_evidence)
}

/// Share of the pipeline done, counting the task queue as the bulk of the
/// implementation phase.
pub fn progress_percentage(phase: u8, gates_passed: &[u8], tasks: Option<&Progress>) -> f64 {
    if gates_passed.len() == PHASE_COUNT {
        return 100.0;
    }
    let per_phase = 100.0 / PHASE_COUNT as f64;
    let mut pct = f64::from(phase.saturating_sub(1)) * per_phase;
    if phase == IMPLEMENTATION_PHASE
        && let Some(tasks) = tasks
    {
        pct += tasks.percentage / 100.0 * per_phase;
    }
    (pct * 10.0).round() / 10.0
}
