use anyhow::Result;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::launcher::{AgentLauncher, LaunchOutcome};
use super::registry::{AgentOutcome, CompletedAgent};
use crate::config::Config;
use crate::errors::LaunchError;
use crate::task::{TaskQueue, TaskStatus};

/// Attempts per task in a single run before the driver gives up on it.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What a [`TaskDriver::run`] did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriverReport {
    pub completed: Vec<String>,
    /// Tasks whose agent exited non-zero or could not start (one entry per failure)
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
    /// Tasks left unfinished when the run ended
    pub stalled_on: Vec<String>,
}

impl DriverReport {
    pub fn finished(&self) -> bool {
        self.stalled_on.is_empty()
    }
}

/// Pulls eligible tasks into the launcher until the queue drains.
///
/// Each task is launched under its own id as the component name. On every
/// tick the driver reaps exited agents (exit 0 completes the task, anything
/// else resets it to Incomplete), terminates agents past the timeout, and
/// refills free slots. It stops when nothing is running and nothing more can
/// start.
pub struct TaskDriver {
    queue: TaskQueue,
    launcher: AgentLauncher,
    poll_interval: Duration,
    agent_timeout: Duration,
    max_attempts: u32,
    progress: ProgressBar,
}

impl TaskDriver {
    pub fn new(config: &Config) -> Self {
        Self::from_parts(config, TaskQueue::new(config), AgentLauncher::new(config))
    }

    pub fn from_parts(config: &Config, queue: TaskQueue, launcher: AgentLauncher) -> Self {
        Self {
            queue,
            launcher,
            poll_interval: config.poll_interval(),
            agent_timeout: config.agent_timeout(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Show a progress bar while running.
    pub fn with_progress(mut self) -> Self {
        let style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix("Tasks");
        self.progress = bar;
        self
    }

    pub async fn run(&self) -> Result<DriverReport> {
        let mut report = DriverReport::default();
        let mut attempts: HashMap<String, u32> = HashMap::new();

        loop {
            let launched = self.fill_slots(&mut attempts, &mut report)?;
            self.refresh_progress()?;

            let status = self.launcher.status()?;
            if status.active.is_empty() && status.queued.is_empty() && launched == 0 {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;

            for exit in self.launcher.reap()? {
                self.handle_exit(&exit, &mut attempts, &mut report)?;
            }
            self.enforce_timeout(&mut attempts, &mut report)?;
        }

        let state = self.queue.state()?;
        report.stalled_on = state
            .tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect();
        self.progress.finish_and_clear();

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            stalled = report.stalled_on.len(),
            "Task driver finished"
        );
        Ok(report)
    }

    /// Start eligible tasks while the launcher has free slots. Returns how many started.
    fn fill_slots(
        &self,
        attempts: &mut HashMap<String, u32>,
        report: &mut DriverReport,
    ) -> Result<usize> {
        let mut launched = 0;
        let mut skipped: HashSet<String> = HashSet::new();

        while self.launcher.has_capacity()? {
            let state = self.queue.state()?;
            let Some(task) = state.eligible().into_iter().find(|t| {
                !skipped.contains(&t.id)
                    && attempts.get(&t.id).copied().unwrap_or(0) < self.max_attempts
            }) else {
                break;
            };
            let id = task.id.clone();

            self.queue.start_task(&id)?;
            match self.launcher.launch(&id, Some(&id), 0) {
                Ok(LaunchOutcome::Started { pid, generation }) => {
                    debug!(task = %id, pid, generation, "Launched agent for task");
                    launched += 1;
                }
                Ok(LaunchOutcome::Queued { position }) => {
                    debug!(task = %id, position, "Task queued behind other agents");
                    launched += 1;
                }
                Err(LaunchError::AlreadyScheduled(_)) => {
                    // Another process already runs an agent for it.
                    skipped.insert(id);
                }
                Err(LaunchError::SpawnFailed { source, .. }) => {
                    warn!(task = %id, error = %source, "Agent failed to start");
                    self.queue
                        .reset_to_incomplete(&id, &format!("agent failed to start: {}", source))?;
                    *attempts.entry(id.clone()).or_default() += 1;
                    report.failed.push(id.clone());
                    skipped.insert(id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(launched)
    }

    fn handle_exit(
        &self,
        exit: &CompletedAgent,
        attempts: &mut HashMap<String, u32>,
        report: &mut DriverReport,
    ) -> Result<()> {
        let Some(task_id) = &exit.task_id else {
            return Ok(());
        };

        if exit.outcome == AgentOutcome::Exited && exit.exit_code == Some(0) {
            self.queue.complete_task(
                task_id,
                Some(json!({
                    "exit_code": 0,
                    "generation": exit.generation,
                    "finished_at": exit.finished_at,
                })),
            )?;
            report.completed.push(task_id.clone());
            self.progress.println(format!("  completed {}", task_id));
            return Ok(());
        }

        *attempts.entry(task_id.clone()).or_default() += 1;
        let reason = match exit.exit_code {
            Some(code) => format!("agent exited with code {}", code),
            None => format!("agent {}", exit.outcome),
        };
        warn!(task = %task_id, %reason, "Task attempt failed");
        self.queue.reset_to_incomplete(task_id, &reason)?;
        report.failed.push(task_id.clone());
        Ok(())
    }

    fn enforce_timeout(
        &self,
        attempts: &mut HashMap<String, u32>,
        report: &mut DriverReport,
    ) -> Result<()> {
        let now = Utc::now();
        for agent in self.launcher.status()?.active {
            let elapsed = (now - agent.started_at).to_std().unwrap_or_default();
            if elapsed < self.agent_timeout {
                continue;
            }
            warn!(component = %agent.component, ?elapsed, "Agent timed out");
            self.launcher.terminate(&agent.component, Some(agent.generation))?;
            if let Some(task_id) = agent.task_id {
                *attempts.entry(task_id.clone()).or_default() += 1;
                self.queue.reset_to_incomplete(&task_id, "agent timed out")?;
                report.timed_out.push(task_id);
            }
        }
        Ok(())
    }

    fn refresh_progress(&self) -> Result<()> {
        let progress = self.queue.progress()?;
        self.progress.set_length(progress.total as u64);
        self.progress.set_position(progress.completed as u64);
        self.progress
            .set_message(format!("{} running", progress.in_progress));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::FakeSpawner;
    use crate::settings::Settings;
    use crate::task::Task;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    struct Harness {
        driver: TaskDriver,
        queue: TaskQueue,
        launcher: AgentLauncher,
        spawner: Arc<FakeSpawner>,
        _dir: TempDir,
    }

    fn harness(max: usize) -> Harness {
        let dir = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.enforcement.poll_interval_ms = 5;
        let config = Config::with_settings(dir.path().to_path_buf(), settings, false)
            .with_max_concurrent(Some(max));
        config.ensure_directories().unwrap();
        let spawner = Arc::new(FakeSpawner::default());
        let launcher = AgentLauncher::with_spawner(&config, spawner.clone());
        let queue = TaskQueue::new(&config);
        let driver = TaskDriver::from_parts(&config, queue.clone(), launcher.clone());
        Harness {
            driver,
            queue,
            launcher,
            spawner,
            _dir: dir,
        }
    }

    /// Finishes every running agent with `code` whenever it is polled.
    fn autocomplete(h: &Harness, code: i32) -> tokio::task::JoinHandle<()> {
        let launcher = h.launcher.clone();
        let spawner = h.spawner.clone();
        tokio::spawn(async move {
            for _ in 0..2000 {
                if let Ok(status) = launcher.status() {
                    for agent in status.active {
                        spawner.finish(agent.pid, Some(code));
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    #[tokio::test]
    async fn test_runs_queue_in_dependency_order() {
        let h = harness(2);
        h.queue
            .add_tasks(
                vec![
                    Task::new("A", "a"),
                    Task::new("B", "b").with_dependencies(["A"]),
                    Task::new("C", "c"),
                ],
                None,
            )
            .unwrap();

        let helper = autocomplete(&h, 0);
        let report = h.driver.run().await.unwrap();
        helper.abort();

        assert!(report.finished());
        assert_eq!(report.completed.len(), 3);
        let order = h.queue.state().unwrap().completion_order;
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("A") < pos("B"));
        assert!(h.queue.is_complete().unwrap());

        let spawned = h.spawner.spawned();
        assert_eq!(spawned.len(), 3);
        assert!(spawned.iter().all(|r| r.task_id.as_deref() == Some(r.component.as_str())));
    }

    #[tokio::test]
    async fn test_failing_task_stops_after_max_attempts() {
        let h = harness(1);
        h.queue.add_task(Task::new("A", "a")).unwrap();

        let helper = autocomplete(&h, 2);
        let driver = h.driver.with_max_attempts(2);
        let report = driver.run().await.unwrap();
        helper.abort();

        assert_eq!(report.failed, vec!["A", "A"]);
        assert_eq!(report.stalled_on, vec!["A"]);
        let task = h.queue.get("A").unwrap();
        assert_eq!(task.status, TaskStatus::Incomplete);
        assert_eq!(task.reset_history.len(), 2);
        assert!(task.reset_history[0].reason.contains("code 2"));
    }

    #[tokio::test]
    async fn test_timed_out_agent_is_terminated() {
        let h = harness(1);
        h.queue.add_task(Task::new("A", "a")).unwrap();

        let driver = h
            .driver
            .with_agent_timeout(Duration::ZERO)
            .with_max_attempts(1);
        let report = driver.run().await.unwrap();

        assert_eq!(report.timed_out, vec!["A"]);
        assert_eq!(h.spawner.terminated().len(), 1);
        assert_eq!(h.queue.get("A").unwrap().status, TaskStatus::Incomplete);
        assert!(h.launcher.status().unwrap().active.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_tasks_are_reported_as_stalled() {
        let h = harness(2);
        h.queue
            .add_task(Task::new("A", "a").with_dependencies(["missing"]))
            .unwrap();
        let report = h.driver.run().await.unwrap();
        assert!(report.completed.is_empty());
        assert_eq!(report.stalled_on, vec!["A"]);
        assert!(h.spawner.spawned().is_empty());
    }
}
