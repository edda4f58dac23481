use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::registry::{ActiveAgent, AgentOutcome, AgentRegistry, CompletedAgent, QueuedAgent};
use super::spawner::{AgentRequest, CommandSpawner, ProcessState, Spawner};
use crate::config::Config;
use crate::errors::LaunchError;
use crate::store::JsonStore;
use crate::task::{Task, TaskQueue};

/// Completed entries included in [`LauncherStatus`].
const RECENT_COMPLETED: usize = 10;

/// Result of [`AgentLauncher::launch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LaunchOutcome {
    Started { pid: u32, generation: u64 },
    /// 1-based position in launch order
    Queued { position: usize },
}

/// Result of [`AgentLauncher::terminate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateOutcome {
    Signalled,
    /// The recorded process had already exited; its slot was freed
    AlreadyGone,
    /// The component was waiting in the queue and has been removed
    Dequeued,
    /// The active agent belongs to a different launch than the caller expected
    GenerationMismatch { current: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct LauncherStatus {
    pub max_concurrent: usize,
    pub active: Vec<ActiveAgent>,
    pub queued: Vec<QueuedAgent>,
    pub recent: Vec<CompletedAgent>,
}

/// An agent started by [`AgentLauncher::process_queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub component: String,
    pub task_id: Option<String>,
    pub pid: u32,
    pub generation: u64,
}

/// Bounded-concurrency executor for agent processes.
///
/// The registry in `agents.json` is the only record of what runs. Every
/// operation re-reads it under the store lock, so several `pipewright`
/// processes can share one launcher without exceeding the limit.
#[derive(Clone)]
pub struct AgentLauncher {
    store: JsonStore<AgentRegistry>,
    spawner: Arc<dyn Spawner>,
    tasks: TaskQueue,
    max_concurrent: usize,
    working_dir: PathBuf,
    agent_log_dir: PathBuf,
}

impl std::fmt::Debug for AgentLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLauncher")
            .field("store", &self.store)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

impl AgentLauncher {
    /// Launcher running the configured agent command.
    pub fn new(config: &Config) -> Self {
        Self::with_spawner(
            config,
            Arc::new(CommandSpawner::new(config.settings.agent_cmd())),
        )
    }

    pub fn with_spawner(config: &Config, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            store: JsonStore::new(config.agents_file.clone()),
            spawner,
            tasks: TaskQueue::new(config),
            max_concurrent: config.max_concurrent(),
            working_dir: config.project_dir.clone(),
            agent_log_dir: config.log_dir.join("agents"),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn registry(&self) -> Result<AgentRegistry, LaunchError> {
        Ok(self.store.load()?)
    }

    pub fn has_capacity(&self) -> Result<bool, LaunchError> {
        Ok(self.registry()?.active.len() < self.max_concurrent)
    }

    /// Start an agent for `component` now if a slot is free, else queue it.
    pub fn launch(
        &self,
        component: &str,
        task_id: Option<&str>,
        priority: i32,
    ) -> Result<LaunchOutcome, LaunchError> {
        let attempt = self.store.update(|registry| {
            if registry.is_scheduled(component) {
                return Err(LaunchError::AlreadyScheduled(component.to_string()));
            }

            if registry.active.len() < self.max_concurrent {
                return Ok(self
                    .start(registry, component, task_id)
                    .map(|s| LaunchOutcome::Started {
                        pid: s.pid,
                        generation: s.generation,
                    }));
            }

            let sequence = registry.take_sequence();
            registry.queued.push(QueuedAgent {
                component: component.to_string(),
                task_id: task_id.map(str::to_string),
                priority,
                sequence,
                submitted_at: Utc::now(),
            });
            let position = registry.queue_position(component).unwrap_or(registry.queued.len());
            info!(component, priority, position, "Agent queued");
            Ok(Ok(LaunchOutcome::Queued { position }))
        })?;

        attempt.map_err(|source| LaunchError::SpawnFailed {
            component: component.to_string(),
            source,
        })
    }

    /// Launch queued agents, highest priority first, while slots are free.
    ///
    /// A queued entry whose spawn fails is recorded and skipped.
    pub fn process_queue(&self) -> Result<Vec<Started>, LaunchError> {
        self.store.update(|registry| Ok(self.drain_queue(registry)))
    }

    fn drain_queue(&self, registry: &mut AgentRegistry) -> Vec<Started> {
        let mut started = Vec::new();
        while registry.active.len() < self.max_concurrent {
            let Some(next) = registry.pop_next_queued() else {
                break;
            };
            match self.start(registry, &next.component, next.task_id.as_deref()) {
                Ok(s) => started.push(s),
                Err(e) => warn!(component = %next.component, error = %e, "Queued agent failed to start"),
            }
        }
        started
    }

    /// Spawn into a free slot. Caller holds the registry lock.
    fn start(
        &self,
        registry: &mut AgentRegistry,
        component: &str,
        task_id: Option<&str>,
    ) -> anyhow::Result<Started> {
        let generation = registry.take_generation();
        let token = Uuid::new_v4().simple().to_string();
        let log_path = self
            .agent_log_dir
            .join(format!("{}-{}.log", file_stem(component), generation));

        let task = task_id.and_then(|id| self.tasks.get(id).ok());
        let request = AgentRequest {
            component: component.to_string(),
            task_id: task_id.map(str::to_string),
            prompt: build_prompt(component, task.as_ref()),
            token: token.clone(),
            generation,
            working_dir: self.working_dir.clone(),
            log_path: log_path.clone(),
        };

        let pid = match self.spawner.spawn(&request) {
            Ok(pid) => pid,
            Err(e) => {
                registry.record_completed(CompletedAgent {
                    component: component.to_string(),
                    task_id: task_id.map(str::to_string),
                    exit_code: None,
                    finished_at: Utc::now(),
                    generation,
                    outcome: AgentOutcome::SpawnFailed,
                });
                return Err(e);
            }
        };

        registry.active.push(ActiveAgent {
            component: component.to_string(),
            task_id: task_id.map(str::to_string),
            pid,
            generation,
            token,
            started_at: Utc::now(),
            log_path: Some(log_path),
        });
        info!(component, pid, generation, "Agent started");

        Ok(Started {
            component: component.to_string(),
            task_id: task_id.map(str::to_string),
            pid,
            generation,
        })
    }

    /// Record that the agent for `component` exited, free its slot and refill.
    pub fn on_exit(
        &self,
        component: &str,
        exit_code: Option<i32>,
    ) -> Result<CompletedAgent, LaunchError> {
        self.store.update(|registry| {
            let agent = registry
                .remove_active(component)
                .ok_or_else(|| LaunchError::UnknownComponent(component.to_string()))?;
            let completed = finish(agent, exit_code, AgentOutcome::Exited);
            registry.record_completed(completed.clone());
            info!(component, ?exit_code, "Agent exited");
            self.drain_queue(registry);
            Ok(completed)
        })
    }

    /// Collect every active agent whose process has ended, then refill the slots.
    pub fn reap(&self) -> Result<Vec<CompletedAgent>, LaunchError> {
        self.store.update(|registry| {
            let finished = self.collect_finished(registry);
            if !finished.is_empty() {
                self.drain_queue(registry);
            }
            Ok(finished)
        })
    }

    /// Drop active entries whose process is gone, without launching anything.
    ///
    /// Used on resume, where the previous run's agents may have died with it.
    pub fn reclaim_stale(&self) -> Result<Vec<String>, LaunchError> {
        self.store.update(|registry| {
            let reclaimed: Vec<String> = self
                .collect_finished(registry)
                .into_iter()
                .map(|c| c.component)
                .collect();
            if !reclaimed.is_empty() {
                warn!(count = reclaimed.len(), "Reclaimed stale agent slots");
            }
            Ok(reclaimed)
        })
    }

    fn collect_finished(&self, registry: &mut AgentRegistry) -> Vec<CompletedAgent> {
        let mut finished = Vec::new();
        let mut still_running = Vec::new();
        for agent in registry.active.drain(..) {
            match self.spawner.state(agent.pid, &agent.token) {
                ProcessState::Running => still_running.push(agent),
                ProcessState::Exited(code) => {
                    info!(component = %agent.component, ?code, "Agent exited");
                    finished.push(finish(agent, code, AgentOutcome::Exited));
                }
                ProcessState::Gone => {
                    warn!(component = %agent.component, pid = agent.pid, "Agent process lost");
                    finished.push(finish(agent, None, AgentOutcome::Lost));
                }
            }
        }
        registry.active = still_running;
        for entry in &finished {
            registry.record_completed(entry.clone());
        }
        finished
    }

    /// Stop the agent for `component`, or drop it from the queue.
    ///
    /// The signal is only sent when the recorded PID still carries the
    /// agent's liveness token, and, if `expected_generation` is given, the
    /// active entry belongs to that launch.
    pub fn terminate(
        &self,
        component: &str,
        expected_generation: Option<u64>,
    ) -> Result<TerminateOutcome, LaunchError> {
        self.store.update(|registry| {
            if let Some(index) = registry.queued.iter().position(|q| q.component == component) {
                registry.queued.remove(index);
                info!(component, "Queued agent removed");
                return Ok(TerminateOutcome::Dequeued);
            }

            let agent = registry
                .active_for(component)
                .cloned()
                .ok_or_else(|| LaunchError::UnknownComponent(component.to_string()))?;

            if let Some(expected) = expected_generation
                && expected != agent.generation
            {
                warn!(component, expected, current = agent.generation, "Generation mismatch; not terminating");
                return Ok(TerminateOutcome::GenerationMismatch {
                    current: agent.generation,
                });
            }

            let outcome = match self.spawner.state(agent.pid, &agent.token) {
                ProcessState::Running => match self.spawner.terminate(agent.pid) {
                    Ok(true) => TerminateOutcome::Signalled,
                    Ok(false) => TerminateOutcome::AlreadyGone,
                    Err(e) => {
                        warn!(component, pid = agent.pid, error = %e, "Failed to signal agent");
                        TerminateOutcome::AlreadyGone
                    }
                },
                ProcessState::Exited(_) | ProcessState::Gone => TerminateOutcome::AlreadyGone,
            };

            registry.remove_active(component);
            registry.record_completed(finish(agent, None, AgentOutcome::Terminated));
            info!(component, ?outcome, "Agent terminated");
            self.drain_queue(registry);
            Ok(outcome)
        })
    }

    pub fn status(&self) -> Result<LauncherStatus, LaunchError> {
        let registry = self.registry()?;
        let skip = registry.completed.len().saturating_sub(RECENT_COMPLETED);
        Ok(LauncherStatus {
            max_concurrent: self.max_concurrent,
            queued: registry.sorted_queue(),
            recent: registry.completed[skip..].to_vec(),
            active: registry.active,
        })
    }
}

fn finish(agent: ActiveAgent, exit_code: Option<i32>, outcome: AgentOutcome) -> CompletedAgent {
    CompletedAgent {
        component: agent.component,
        task_id: agent.task_id,
        exit_code,
        finished_at: Utc::now(),
        generation: agent.generation,
        outcome,
    }
}

fn file_stem(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Prompt handed to the agent on stdin.
fn build_prompt(component: &str, task: Option<&Task>) -> String {
    let Some(task) = task else {
        return format!("Implement the `{}` component.\n", component);
    };

    let mut prompt = format!("Task {}: {}\n", task.id, task.name);
    if let Some(feature) = &task.feature_id {
        prompt.push_str(&format!("Feature: {}\n", feature));
    }
    if !task.description.is_empty() {
        prompt.push('\n');
        prompt.push_str(&task.description);
        prompt.push('\n');
    }
    if !task.dependencies.is_empty() {
        prompt.push_str(&format!(
            "\nBuilds on completed tasks: {}\n",
            task.dependencies.join(", ")
        ));
    }
    prompt
}
