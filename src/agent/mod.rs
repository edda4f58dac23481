//! Agent execution: a persisted registry, a bounded-concurrency launcher, and
//! the task driver that feeds it from the queue.

pub mod driver;
pub mod launcher;
pub mod registry;
pub mod spawner;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{DriverReport, TaskDriver};
pub use launcher::{AgentLauncher, LaunchOutcome, LauncherStatus, TerminateOutcome};
pub use registry::{ActiveAgent, AgentOutcome, AgentRegistry, CompletedAgent, QueuedAgent};
pub use spawner::{AgentRequest, CommandSpawner, ProcessState, Spawner};
