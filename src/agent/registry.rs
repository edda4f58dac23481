use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Completed entries kept in `agents.json`; older ones are dropped.
pub const MAX_COMPLETED_HISTORY: usize = 200;

/// A running agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveAgent {
    pub component: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub pid: u32,
    /// Monotonic launch counter; distinguishes a relaunch of the same component
    pub generation: u64,
    /// Random value exported to the agent's environment to recognise PID reuse
    pub token: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAgent {
    pub component: String,
    #[serde(default)]
    pub task_id: Option<String>,
    /// Higher runs first
    #[serde(default)]
    pub priority: i32,
    /// Submission order, breaks priority ties FIFO
    pub sequence: u64,
    pub submitted_at: DateTime<Utc>,
}

/// How an agent left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Exited,
    Terminated,
    /// The process disappeared without an observed exit
    Lost,
    SpawnFailed,
}

impl std::fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentOutcome::Exited => write!(f, "exited"),
            AgentOutcome::Terminated => write!(f, "terminated"),
            AgentOutcome::Lost => write!(f, "lost"),
            AgentOutcome::SpawnFailed => write!(f, "spawn failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedAgent {
    pub component: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub finished_at: DateTime<Utc>,
    #[serde(default)]
    pub generation: u64,
    pub outcome: AgentOutcome,
}

/// Persisted launcher state (`agents.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistry {
    #[serde(default)]
    pub active: Vec<ActiveAgent>,
    #[serde(default)]
    pub queued: Vec<QueuedAgent>,
    #[serde(default)]
    pub completed: Vec<CompletedAgent>,
    #[serde(default)]
    pub next_generation: u64,
    #[serde(default)]
    pub next_sequence: u64,
}

impl AgentRegistry {
    pub fn active_for(&self, component: &str) -> Option<&ActiveAgent> {
        self.active.iter().find(|a| a.component == component)
    }

    pub fn is_scheduled(&self, component: &str) -> bool {
        self.active_for(component).is_some() || self.queued.iter().any(|q| q.component == component)
    }

    pub fn take_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn take_sequence(&mut self) -> u64 {
        self.next_sequence += 1;
        self.next_sequence
    }

    /// Remove and return the queued entry that should run next.
    pub fn pop_next_queued(&mut self) -> Option<QueuedAgent> {
        let index = self
            .queued
            .iter()
            .enumerate()
            .min_by_key(|(_, q)| (std::cmp::Reverse(q.priority), q.sequence))
            .map(|(i, _)| i)?;
        Some(self.queued.remove(index))
    }

    /// Queue in launch order.
    pub fn sorted_queue(&self) -> Vec<QueuedAgent> {
        let mut queue = self.queued.clone();
        queue.sort_by_key(|q| (std::cmp::Reverse(q.priority), q.sequence));
        queue
    }

    /// 1-based position of `component` in launch order.
    pub fn queue_position(&self, component: &str) -> Option<usize> {
        self.sorted_queue()
            .iter()
            .position(|q| q.component == component)
            .map(|i| i + 1)
    }

    pub fn remove_active(&mut self, component: &str) -> Option<ActiveAgent> {
        let index = self.active.iter().position(|a| a.component == component)?;
        Some(self.active.remove(index))
    }

    pub fn record_completed(&mut self, entry: CompletedAgent) {
        self.completed.push(entry);
        if self.completed.len() > MAX_COMPLETED_HISTORY {
            let excess = self.completed.len() - MAX_COMPLETED_HISTORY;
            self.completed.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(component: &str, priority: i32, sequence: u64) -> QueuedAgent {
        QueuedAgent {
            component: component.into(),
            task_id: None,
            priority,
            sequence,
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn test_pop_prefers_priority_then_fifo() {
        let mut registry = AgentRegistry {
            queued: vec![queued("a", 0, 1), queued("b", 5, 2), queued("c", 5, 3), queued("d", 0, 4)],
            ..Default::default()
        };
        let order: Vec<_> = std::iter::from_fn(|| registry.pop_next_queued())
            .map(|q| q.component)
            .collect();
        assert_eq!(order, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_queue_position() {
        let registry = AgentRegistry {
            queued: vec![queued("low", -1, 1), queued("high", 3, 2)],
            ..Default::default()
        };
        assert_eq!(registry.queue_position("high"), Some(1));
        assert_eq!(registry.queue_position("low"), Some(2));
        assert_eq!(registry.queue_position("none"), None);
    }

    #[test]
    fn test_completed_history_is_bounded() {
        let mut registry = AgentRegistry::default();
        for i in 0..(MAX_COMPLETED_HISTORY + 5) {
            registry.record_completed(CompletedAgent {
                component: format!("c{}", i),
                task_id: None,
                exit_code: Some(0),
                finished_at: Utc::now(),
                generation: i as u64,
                outcome: AgentOutcome::Exited,
            });
        }
        assert_eq!(registry.completed.len(), MAX_COMPLETED_HISTORY);
        assert_eq!(registry.completed[0].component, "c5");
    }

    #[test]
    fn test_generation_is_monotonic() {
        let mut registry = AgentRegistry::default();
        assert_eq!(registry.take_generation(), 1);
        assert_eq!(registry.take_generation(), 2);
        assert_eq!(registry.take_sequence(), 1);
    }
}
