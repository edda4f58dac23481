use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use super::confirm::Confirmer;
use super::consistency::{ConsistencyReport, check_consistency};
use super::discovery::{DiscoveredState, discover};
use crate::agent::AgentLauncher;
use crate::checkpoint::{
    Checkpoint, CheckpointStatus, CheckpointStore, LoadOutcome, StoppingContext,
};
use crate::config::Config;
use crate::ecosystem::EcosystemRegistry;
use crate::errors::CheckpointError;
use crate::phase::{GateOutcome, PhaseStatus};
use crate::store::repair::RepairStrategy;
use crate::task::{TaskQueue, TaskStatus};
use crate::tracker::{GitTracker, RetryPolicy};

/// Prompt recorded on a checkpoint rebuilt from discovered state.
pub const DISCOVERED_PROMPT: &str = "Reconstructed by state discovery";

/// Where the resume point came from.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeSource {
    Checkpoint {
        orchestration_id: String,
        status: CheckpointStatus,
        /// Set when the file had to be repaired first
        #[serde(skip_serializing_if = "Option::is_none")]
        repaired_with: Option<RepairStrategy>,
        #[serde(skip_serializing_if = "Option::is_none")]
        backup_path: Option<PathBuf>,
    },
    Discovery(Box<DiscoveredState>),
}

/// Everything the operator needs to decide whether to resume.
#[derive(Debug, Clone, Serialize)]
pub struct ResumePlan {
    pub source: ResumeSource,
    /// `None` when every phase is complete
    pub resume_phase: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyReport>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_context: Option<StoppingContext>,
    /// Tasks left InProgress by the interrupted run
    pub in_flight_tasks: Vec<String>,
}

impl ResumePlan {
    pub fn is_complete(&self) -> bool {
        self.resume_phase.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ResumeDecision {
    /// Reported only, nothing changed
    DryRun,
    Declined,
    NothingToResume,
    Resumed {
        orchestration_id: String,
        reset_tasks: Vec<String>,
        reclaimed_agents: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeOutcome {
    pub plan: ResumePlan,
    pub decision: ResumeDecision,
}

/// Decides where an interrupted orchestration picks up, and sets it up to do so.
pub struct ResumeCoordinator {
    config: Config,
    checkpoints: CheckpointStore,
    tasks: TaskQueue,
    launcher: AgentLauncher,
    ecosystems: EcosystemRegistry,
    confirmer: Box<dyn Confirmer>,
}

impl ResumeCoordinator {
    pub fn new(config: &Config, confirmer: Box<dyn Confirmer>) -> Self {
        Self::with_launcher(config, AgentLauncher::new(config), confirmer)
    }

    pub fn with_launcher(
        config: &Config,
        launcher: AgentLauncher,
        confirmer: Box<dyn Confirmer>,
    ) -> Self {
        Self {
            config: config.clone(),
            checkpoints: CheckpointStore::new(config),
            tasks: TaskQueue::new(config),
            launcher,
            ecosystems: EcosystemRegistry::with_defaults(),
            confirmer,
        }
    }

    pub fn with_ecosystems(mut self, ecosystems: EcosystemRegistry) -> Self {
        self.ecosystems = ecosystems;
        self
    }

    fn git(&self) -> Option<GitTracker> {
        GitTracker::discover(&self.config.project_dir)
            .map(|g| g.with_retry_policy(RetryPolicy::within(self.config.git_timeout())))
    }

    /// Load the checkpoint, falling back to discovery.
    ///
    /// A corrupt checkpoint is repaired in memory only; nothing is written.
    pub async fn plan(&self) -> Result<ResumePlan> {
        let in_flight_tasks: Vec<String> = self
            .tasks
            .tasks()?
            .into_iter()
            .filter(|t| t.status == TaskStatus::InProgress)
            .map(|t| t.id)
            .collect();

        if let Some((checkpoint, repaired_with, backup_path)) = self.load_checkpoint()? {
            let consistency = check_consistency(&self.config, &checkpoint, self.git().as_ref());
            let mut warnings = consistency.warnings();
            if let Some(strategy) = repaired_with {
                warnings.insert(0, format!("Checkpoint was corrupt and repaired ({})", strategy));
            }
            for w in &warnings {
                warn!(warning = %w, "Resume consistency");
            }

            let resume_phase = match checkpoint.status {
                CheckpointStatus::Completed => None,
                _ => checkpoint.resume_phase(),
            };
            return Ok(ResumePlan {
                source: ResumeSource::Checkpoint {
                    orchestration_id: checkpoint.orchestration_id.clone(),
                    status: checkpoint.status,
                    repaired_with,
                    backup_path,
                },
                resume_phase,
                consistency: Some(consistency),
                warnings,
                stopping_context: checkpoint.stopping_context.clone(),
                in_flight_tasks,
            });
        }

        let discovered = discover(&self.config, &self.ecosystems).await?;
        let mut warnings = vec![format!(
            "No usable checkpoint; resume point inferred with {} confidence",
            discovered.confidence
        )];
        warnings.extend(
            discovered
                .missing_evidence
                .iter()
                .map(|m| format!("No evidence from {}", m)),
        );
        let resume_phase = (!discovered.is_complete()).then_some(discovered.inferred_phase);

        Ok(ResumePlan {
            source: ResumeSource::Discovery(Box::new(discovered)),
            resume_phase,
            consistency: None,
            warnings,
            stopping_context: None,
            in_flight_tasks,
        })
    }

    /// A valid checkpoint (repaired in memory if needed), or `None` to use discovery.
    fn load_checkpoint(
        &self,
    ) -> Result<Option<(Checkpoint, Option<RepairStrategy>, Option<PathBuf>)>> {
        match self.checkpoints.load() {
            LoadOutcome::Valid(cp) => Ok(Some((*cp, None, None))),
            LoadOutcome::Missing => {
                info!("No checkpoint found, running state discovery");
                Ok(None)
            }
            LoadOutcome::Invalid { reason } => {
                warn!(%reason, "Checkpoint invalid, attempting recovery");
                match self.checkpoints.preview_recovery() {
                    Ok(report) => Ok(Some((report.checkpoint, report.strategy, report.backup_path))),
                    Err(CheckpointError::Unrecoverable(why)) => {
                        warn!(%why, "Checkpoint unrecoverable, running state discovery");
                        Ok(None)
                    }
                    Err(e) => Err(e).context("Checkpoint recovery failed"),
                }
            }
        }
    }

    /// Plan, confirm, and on confirmation prepare the run to continue.
    ///
    /// With `dry_run` the plan is returned without asking and nothing is written.
    pub async fn resume(&self, dry_run: bool) -> Result<ResumeOutcome> {
        let mut plan = self.plan().await?;

        if plan.is_complete() {
            return Ok(ResumeOutcome {
                plan,
                decision: ResumeDecision::NothingToResume,
            });
        }
        if dry_run {
            return Ok(ResumeOutcome {
                plan,
                decision: ResumeDecision::DryRun,
            });
        }
        if !self.confirmer.confirm(&plan)? {
            info!("Resume declined by operator");
            return Ok(ResumeOutcome {
                plan,
                decision: ResumeDecision::Declined,
            });
        }

        if let ResumeSource::Checkpoint {
            repaired_with: Some(_),
            backup_path,
            ..
        } = &mut plan.source
        {
            let report = self
                .checkpoints
                .recover()
                .context("Checkpoint recovery failed")?;
            *backup_path = report.backup_path;
        }

        let reclaimed_agents = self.launcher.reclaim_stale()?;
        // Tasks whose agent survived the interruption keep running.
        let registry = self.launcher.registry()?;
        let live: Vec<String> = registry
            .active
            .iter()
            .filter_map(|a| a.task_id.clone())
            .chain(registry.queued.iter().filter_map(|q| q.task_id.clone()))
            .collect();
        let reset_tasks = self.tasks.reset_all(
            &[TaskStatus::InProgress],
            &live,
            "interrupted; reset on resume",
        )?;

        let orchestration_id = match &plan.source {
            ResumeSource::Checkpoint { .. } => self.checkpoints.mark_resumed()?.orchestration_id,
            ResumeSource::Discovery(state) => self.persist_discovered(state)?.orchestration_id,
        };

        info!(
            id = %orchestration_id,
            phase = ?plan.resume_phase,
            reset = reset_tasks.len(),
            reclaimed = reclaimed_agents.len(),
            "Orchestration resumed"
        );
        Ok(ResumeOutcome {
            plan,
            decision: ResumeDecision::Resumed {
                orchestration_id,
                reset_tasks,
                reclaimed_agents,
            },
        })
    }

    /// Write a fresh checkpoint reflecting discovered progress.
    fn persist_discovered(&self, state: &DiscoveredState) -> Result<Checkpoint> {
        let spec_files = self.config.spec_files()?;
        self.checkpoints
            .create(DISCOVERED_PROMPT, &spec_files, &state.components)?;

        let now = Utc::now();
        let checkpoint = self.checkpoints.update(|cp| {
            for phase in cp.phase_progress.iter_mut() {
                if phase.phase_number < state.inferred_phase {
                    phase.apply_gate(&GateOutcome::Passed, now);
                } else if phase.phase_number == state.inferred_phase {
                    phase.status = PhaseStatus::InProgress;
                    phase.started_at = Some(now);
                }
            }
            Ok(())
        })?;
        Ok(checkpoint)
    }
}
