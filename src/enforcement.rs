//! Verdicts for git hook events.
//!
//! `pipewright hook <event>` is called from the repository's hooks. It reads
//! the queue, checkpoint and gate log and answers allow, warn or block. In
//! non-blocking mode every would-be block is downgraded to a warning. The
//! only write is on `post_commit`, which records the new HEAD against the
//! components it touched.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStatus, CheckpointStore, ComponentState, LoadOutcome};
use crate::config::Config;
use crate::gates::GateLog;
use crate::phase::PHASE_COUNT;
use crate::task::TaskQueue;
use crate::tracker::{GitTracker, RetryPolicy};

/// Git hook events pipewright answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    PreCommit,
    PostCommit,
    PrePush,
}

impl HookEvent {
    pub fn all() -> &'static [HookEvent] {
        &[HookEvent::PreCommit, HookEvent::PostCommit, HookEvent::PrePush]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreCommit => "pre-commit",
            HookEvent::PostCommit => "post-commit",
            HookEvent::PrePush => "pre-push",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HookEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "pre-commit" | "precommit" => Ok(HookEvent::PreCommit),
            "post-commit" | "postcommit" => Ok(HookEvent::PostCommit),
            "pre-push" | "prepush" => Ok(HookEvent::PrePush),
            _ => anyhow::bail!(
                "Invalid hook event '{}'. Valid values: pre-commit, post-commit, pre-push",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Warn,
    Block,
}

impl Verdict {
    pub fn exit_code(&self) -> u8 {
        match self {
            Verdict::Block => 1,
            Verdict::Allow | Verdict::Warn => 0,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Allow => write!(f, "allow"),
            Verdict::Warn => write!(f, "warn"),
            Verdict::Block => write!(f, "block"),
        }
    }
}

/// One observation about the project state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// Whether this blocks the event in blocking mode
    pub violation: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnforcementReport {
    pub event: HookEvent,
    pub verdict: Verdict,
    pub blocking_mode: bool,
    pub findings: Vec<Finding>,
    /// Components whose `last_commit` was updated (post-commit only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recorded_components: Vec<String>,
}

pub struct Enforcer {
    config: Config,
    queue: TaskQueue,
    checkpoints: CheckpointStore,
    gate_log: GateLog,
}

impl Enforcer {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            queue: TaskQueue::new(config),
            checkpoints: CheckpointStore::new(config),
            gate_log: GateLog::open(config.gate_log_file.clone()),
        }
    }

    pub fn evaluate(&self, event: HookEvent) -> Result<EnforcementReport> {
        let mut findings = Vec::new();

        match event {
            HookEvent::PreCommit => {
                self.check_blocked_tasks(&mut findings)?;
                self.check_checkpoint(&mut findings);
            }
            HookEvent::PrePush => {
                self.check_blocked_tasks(&mut findings)?;
                self.check_checkpoint(&mut findings);
                self.check_failed_gates(&mut findings)?;
            }
            HookEvent::PostCommit => {
                self.check_checkpoint(&mut findings);
            }
        }

        let recorded_components = if event == HookEvent::PostCommit {
            self.record_commit()
        } else {
            Vec::new()
        };

        let blocking_mode = self.config.settings.enforcement.blocking;
        let verdict = verdict_for(&findings, blocking_mode, event);
        info!(%event, %verdict, findings = findings.len(), "Hook evaluated");

        Ok(EnforcementReport {
            event,
            verdict,
            blocking_mode,
            findings,
            recorded_components,
        })
    }

    fn check_blocked_tasks(&self, findings: &mut Vec<Finding>) -> Result<()> {
        for blocked in self.queue.blocked_tasks()? {
            findings.push(Finding {
                violation: true,
                message: format!("Task {} can never start ({})", blocked.id, blocked.reason),
            });
        }
        Ok(())
    }

    fn check_checkpoint(&self, findings: &mut Vec<Finding>) {
        match self.checkpoints.load() {
            LoadOutcome::Missing => {}
            LoadOutcome::Invalid { reason } => findings.push(Finding {
                violation: true,
                message: format!("Checkpoint is invalid: {}", reason),
            }),
            LoadOutcome::Valid(cp) => {
                if cp.status == CheckpointStatus::Stopped
                    && let Some(ctx) = &cp.stopping_context
                {
                    findings.push(Finding {
                        violation: false,
                        message: format!(
                            "Orchestration {} is stopped ({}); run `pipewright resume`",
                            cp.orchestration_id, ctx.reason
                        ),
                    });
                }
            }
        }
    }

    /// A blocking gate whose latest run failed.
    fn check_failed_gates(&self, findings: &mut Vec<Finding>) -> Result<()> {
        for phase in 1..=PHASE_COUNT as u8 {
            if let Some(record) = self.gate_log.last_for_phase(phase)?
                && !record.passed
            {
                findings.push(Finding {
                    violation: record.blocking,
                    message: format!("Gate for phase {} failed on its last run", phase),
                });
            }
        }
        Ok(())
    }

    /// Record HEAD as `last_commit` for every checkpoint component it touched.
    fn record_commit(&self) -> Vec<String> {
        let LoadOutcome::Valid(checkpoint) = self.checkpoints.load() else {
            return Vec::new();
        };
        let Some(git) = GitTracker::discover(&self.config.project_dir)
            .map(|g| g.with_retry_policy(RetryPolicy::within(self.config.git_timeout())))
        else {
            return Vec::new();
        };
        let Some(head) = git.head_sha() else {
            return Vec::new();
        };
        let Some(components_root) = git.repo_relative(&self.config.components_dir()) else {
            debug!("Components directory is outside the repository");
            return Vec::new();
        };
        let changed = match git.head_changed_paths() {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "Could not read HEAD diff");
                return Vec::new();
            }
        };

        let touched: Vec<String> = checkpoint
            .component_states
            .keys()
            .filter(|name| {
                let dir = components_root.join(name);
                changed.iter().any(|p| p.starts_with(&dir))
            })
            .cloned()
            .collect();
        if touched.is_empty() {
            return touched;
        }

        let result = self.checkpoints.update(|cp| {
            for name in &touched {
                let state = cp
                    .component_states
                    .entry(name.clone())
                    .or_insert_with(ComponentState::default);
                state.last_commit = Some(head.clone());
            }
            Ok(())
        });
        match result {
            Ok(_) => {
                info!(commit = %head, components = ?touched, "Recorded commit on components");
                touched
            }
            Err(e) => {
                warn!(error = %e, "Could not record commit in checkpoint");
                Vec::new()
            }
        }
    }
}

/// Violations block in blocking mode and warn otherwise; advisory findings
/// warn. A post-commit hook can never block: the commit already exists.
pub fn verdict_for(findings: &[Finding], blocking_mode: bool, event: HookEvent) -> Verdict {
    if findings.is_empty() {
        return Verdict::Allow;
    }
    let has_violation = findings.iter().any(|f| f.violation);
    if has_violation && blocking_mode && event != HookEvent::PostCommit {
        Verdict::Block
    } else {
        Verdict::Warn
    }
}
