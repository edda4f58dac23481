use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Incomplete,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Incomplete => "incomplete",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "incomplete" => Ok(TaskStatus::Incomplete),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

/// One forced downgrade, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRecord {
    pub from: TaskStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Requirement this task was extracted from
    #[serde(default)]
    pub feature_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reset_history: Vec<ResetRecord>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            feature_id: None,
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            verification_result: None,
            reset_history: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self.normalize_dependencies();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Dependencies are a set: drop duplicates, keep first-seen order.
    pub fn normalize_dependencies(&mut self) {
        let mut seen = HashSet::new();
        self.dependencies.retain(|d| seen.insert(d.clone()));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetadata {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Where the task list was imported from
    #[serde(default)]
    pub source: Option<String>,
}

/// Contents of `tasks.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Ids in the order they completed. Append-only.
    #[serde(default)]
    pub completion_order: Vec<String>,
    #[serde(default)]
    pub metadata: QueueMetadata,
}

/// Counts per status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub incomplete: usize,
    pub in_progress: usize,
    pub completed: usize,
    /// Tasks that can never start. Overlaps the status counts above.
    pub blocked: usize,
    pub percentage: f64,
}

impl Progress {
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

/// Why a task can never become eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ids")]
pub enum BlockReason {
    /// One or more dependency ids do not exist
    MissingDependency(Vec<String>),
    /// The task is part of a dependency cycle
    DependencyCycle,
    /// A dependency is itself blocked
    BlockedDependency(Vec<String>),
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::MissingDependency(ids) => write!(f, "missing dependency: {}", ids.join(", ")),
            BlockReason::DependencyCycle => write!(f, "dependency cycle"),
            BlockReason::BlockedDependency(ids) => write!(f, "depends on blocked: {}", ids.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub id: String,
    pub reason: BlockReason,
}

impl TaskState {
    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Dependencies of `task` that are not Completed (missing ids included).
    pub fn waiting_on(&self, task: &Task) -> Vec<String> {
        task.dependencies
            .iter()
            .filter(|dep| {
                self.get(dep)
                    .is_none_or(|d| d.status != TaskStatus::Completed)
            })
            .cloned()
            .collect()
    }

    pub fn dependencies_met(&self, task: &Task) -> bool {
        self.waiting_on(task).is_empty()
    }

    /// Every startable task: Incomplete ones first, then Pending, each in file order.
    pub fn eligible(&self) -> Vec<&Task> {
        [TaskStatus::Incomplete, TaskStatus::Pending]
            .into_iter()
            .flat_map(|status| {
                self.tasks
                    .iter()
                    .filter(move |t| t.status == status && self.dependencies_met(t))
            })
            .collect()
    }

    /// First eligible Incomplete task, else first eligible Pending task.
    pub fn next_eligible(&self) -> Option<&Task> {
        self.eligible().into_iter().next()
    }

    pub fn progress(&self) -> Progress {
        let mut p = Progress {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => p.pending += 1,
                TaskStatus::Incomplete => p.incomplete += 1,
                TaskStatus::InProgress => p.in_progress += 1,
                TaskStatus::Completed => p.completed += 1,
                TaskStatus::Blocked => p.blocked += 1,
            }
        }
        p.blocked += self
            .blocked()
            .iter()
            .filter(|b| self.get(&b.id).is_some_and(|t| t.status != TaskStatus::Blocked))
            .count();
        p.percentage = if p.total == 0 {
            0.0
        } else {
            (p.completed as f64 / p.total as f64 * 1000.0).round() / 10.0
        };
        p
    }

    /// Tasks that can never become eligible, in file order.
    ///
    /// A task is blocked when a dependency id is missing, when it sits on a
    /// dependency cycle, or when it depends (transitively) on a blocked task.
    /// Completed tasks are never reported.
    pub fn blocked(&self) -> Vec<BlockedTask> {
        let open: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .collect();

        let mut reasons: HashMap<&str, BlockReason> = HashMap::new();

        for task in &open {
            let missing: Vec<String> = task
                .dependencies
                .iter()
                .filter(|d| !self.contains(d))
                .cloned()
                .collect();
            if !missing.is_empty() {
                reasons.insert(&task.id, BlockReason::MissingDependency(missing));
            }
        }

        for id in self.cycle_members(&open) {
            reasons.entry(id).or_insert(BlockReason::DependencyCycle);
        }

        // Propagate to dependents until nothing changes.
        loop {
            let mut added = Vec::new();
            for task in &open {
                if reasons.contains_key(task.id.as_str()) {
                    continue;
                }
                let blocked_deps: Vec<String> = task
                    .dependencies
                    .iter()
                    .filter(|d| reasons.contains_key(d.as_str()))
                    .cloned()
                    .collect();
                if !blocked_deps.is_empty() {
                    added.push((task.id.as_str(), BlockReason::BlockedDependency(blocked_deps)));
                }
            }
            if added.is_empty() {
                break;
            }
            reasons.extend(added);
        }

        open.iter()
            .filter_map(|t| {
                reasons.get(t.id.as_str()).map(|reason| BlockedTask {
                    id: t.id.clone(),
                    reason: reason.clone(),
                })
            })
            .collect()
    }

    /// Ids of non-completed tasks that lie on a dependency cycle.
    fn cycle_members<'a>(&'a self, open: &[&'a Task]) -> HashSet<&'a str> {
        let index: HashMap<&str, &Task> = open.iter().map(|&t| (t.id.as_str(), t)).collect();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: Vec<&str> = Vec::new();
        let mut members = HashSet::new();

        fn visit<'a>(
            id: &'a str,
            index: &HashMap<&'a str, &'a Task>,
            visited: &mut HashSet<&'a str>,
            on_stack: &mut Vec<&'a str>,
            members: &mut HashSet<&'a str>,
        ) {
            if let Some(pos) = on_stack.iter().position(|s| *s == id) {
                members.extend(on_stack[pos..].iter().copied());
                return;
            }
            if !visited.insert(id) {
                return;
            }
            let Some(task) = index.get(id) else {
                return;
            };
            on_stack.push(id);
            for dep in &task.dependencies {
                if index.contains_key(dep.as_str()) {
                    visit(dep.as_str(), index, visited, on_stack, members);
                }
            }
            on_stack.pop();
        }

        for &task in open {
            visit(task.id.as_str(), &index, &mut visited, &mut on_stack, &mut members);
        }
        members
    }
}

/// Accepted shapes of a task import file: a bare array, or `{"tasks": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TaskImport {
    List(Vec<Task>),
    Wrapped { tasks: Vec<Task> },
}

impl TaskImport {
    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            TaskImport::List(tasks) | TaskImport::Wrapped { tasks } => tasks,
        }
    }
}
