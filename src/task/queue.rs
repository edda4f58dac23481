use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::model::{BlockedTask, Progress, ResetRecord, Task, TaskState, TaskStatus};
use crate::config::Config;
use crate::errors::TaskError;
use crate::store::JsonStore;

/// Scheduling over `tasks.json`.
///
/// Holds no task data: every call re-loads the file under the store lock, so
/// a hook and the task driver can mutate the queue at the same time.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    store: JsonStore<TaskState>,
}

impl TaskQueue {
    pub fn new(config: &Config) -> Self {
        Self::open(config.tasks_file.clone())
    }

    pub fn open(path: PathBuf) -> Self {
        Self {
            store: JsonStore::new(path),
        }
    }

    pub fn state(&self) -> Result<TaskState, TaskError> {
        Ok(self.store.load()?)
    }

    pub fn tasks(&self) -> Result<Vec<Task>, TaskError> {
        Ok(self.state()?.tasks)
    }

    pub fn get(&self, id: &str) -> Result<Task, TaskError> {
        self.state()?
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    pub fn add_task(&self, task: Task) -> Result<(), TaskError> {
        self.add_tasks(vec![task], None).map(|_| ())
    }

    /// Add a batch of tasks. A duplicate id anywhere rejects the whole batch.
    pub fn add_tasks(&self, tasks: Vec<Task>, source: Option<&str>) -> Result<usize, TaskError> {
        self.store.update(|state| {
            let mut seen: HashSet<&str> = state.tasks.iter().map(|t| t.id.as_str()).collect();
            for task in &tasks {
                if !seen.insert(task.id.as_str()) {
                    return Err(TaskError::DuplicateId(task.id.clone()));
                }
            }

            let now = Utc::now();
            let count = tasks.len();
            for mut task in tasks {
                task.normalize_dependencies();
                state.tasks.push(task);
            }
            state.metadata.created_at.get_or_insert(now);
            state.metadata.updated_at = Some(now);
            if let Some(source) = source {
                state.metadata.source = Some(source.to_string());
            }
            info!(count, "Added tasks to queue");
            Ok(count)
        })
    }

    /// First eligible Incomplete task, else first eligible Pending task.
    pub fn get_next_task(&self) -> Result<Option<Task>, TaskError> {
        Ok(self.state()?.next_eligible().cloned())
    }

    /// Pending/Incomplete -> InProgress. Dependencies must all be Completed.
    pub fn start_task(&self, id: &str) -> Result<Task, TaskError> {
        self.store.update(|state| {
            let task = state
                .get(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Incomplete) {
                return Err(TaskError::InvalidTransition {
                    id: id.to_string(),
                    from: task.status.to_string(),
                    to: TaskStatus::InProgress.to_string(),
                });
            }

            let waiting_on = state.waiting_on(task);
            if !waiting_on.is_empty() {
                return Err(TaskError::DependenciesNotMet {
                    id: id.to_string(),
                    waiting_on,
                });
            }

            let now = Utc::now();
            state.metadata.updated_at = Some(now);
            let task = state
                .get_mut(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            task.status = TaskStatus::InProgress;
            task.started_at = Some(now);
            task.completed_at = None;
            debug!(task = id, "Task started");
            Ok(task.clone())
        })
    }

    /// Mark a task Completed. Completing an already-completed task is a no-op.
    pub fn complete_task(&self, id: &str, result: Option<Value>) -> Result<Task, TaskError> {
        self.store.update(|state| {
            let now = Utc::now();
            let task = state
                .get_mut(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

            if task.status == TaskStatus::Completed {
                debug!(task = id, "Task already completed");
                return Ok(task.clone());
            }

            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            if result.is_some() {
                task.verification_result = result;
            }
            let task = task.clone();

            if !state.completion_order.iter().any(|c| c == id) {
                state.completion_order.push(id.to_string());
            }
            state.metadata.updated_at = Some(now);
            info!(task = id, "Task completed");
            Ok(task)
        })
    }

    /// Force a task back to Incomplete, clearing its timestamps.
    pub fn reset_to_incomplete(&self, id: &str, reason: &str) -> Result<Task, TaskError> {
        self.store.update(|state| {
            let now = Utc::now();
            let task = state
                .get_mut(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            reset(task, reason, now);
            let task = task.clone();
            state.completion_order.retain(|c| c != id);
            state.metadata.updated_at = Some(now);
            Ok(task)
        })
    }

    /// Reset every task whose status is in `statuses`, leaving the ids in
    /// `keep` untouched. Returns the affected ids.
    pub fn reset_all(
        &self,
        statuses: &[TaskStatus],
        keep: &[String],
        reason: &str,
    ) -> Result<Vec<String>, TaskError> {
        self.store.update(|state| {
            let now = Utc::now();
            let mut ids = Vec::new();
            for task in state
                .tasks
                .iter_mut()
                .filter(|t| statuses.contains(&t.status) && !keep.contains(&t.id))
            {
                reset(task, reason, now);
                ids.push(task.id.clone());
            }
            if !ids.is_empty() {
                state.completion_order.retain(|c| !ids.contains(c));
                state.metadata.updated_at = Some(now);
                warn!(count = ids.len(), reason, "Reset tasks to incomplete");
            }
            Ok(ids)
        })
    }

    pub fn is_complete(&self) -> Result<bool, TaskError> {
        Ok(self.progress()?.is_complete())
    }

    pub fn progress(&self) -> Result<Progress, TaskError> {
        Ok(self.state()?.progress())
    }

    /// Tasks that can never become eligible (missing or cyclic dependencies).
    pub fn blocked_tasks(&self) -> Result<Vec<BlockedTask>, TaskError> {
        Ok(self.state()?.blocked())
    }

    /// Remove every task and the completion log. Returns how many tasks were removed.
    pub fn clear(&self) -> Result<usize, TaskError> {
        self.store.update(|state| {
            let removed = state.tasks.len();
            *state = TaskState::default();
            warn!(removed, "Cleared task queue");
            Ok(removed)
        })
    }
}

fn reset(task: &mut Task, reason: &str, now: chrono::DateTime<Utc>) {
    task.reset_history.push(ResetRecord {
        from: task.status,
        reason: reason.to_string(),
        at: now,
    });
    task.status = TaskStatus::Incomplete;
    task.started_at = None;
    task.completed_at = None;
}
