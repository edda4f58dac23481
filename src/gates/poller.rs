use std::time::Duration;
use tracing::debug;

use super::log::GateTrigger;
use super::runner::{GateResult, GateRunner};
use crate::config::Config;
use crate::errors::GateError;
use crate::phase::{IMPLEMENTATION_PHASE, VERIFICATION_PHASE};
use crate::task::TaskQueue;

/// Evaluates the automatic gate triggers.
///
/// - queue 100% complete: run the implementation gate (phase 5)
/// - implementation gate passed: run the verification gate (phase 6)
///
/// A gate already recorded as passed is never re-run.
#[derive(Debug, Clone)]
pub struct GatePoller {
    runner: GateRunner,
    queue: TaskQueue,
}

impl GatePoller {
    pub fn new(config: &Config) -> Self {
        Self {
            runner: GateRunner::new(config),
            queue: TaskQueue::new(config),
        }
    }

    pub fn from_parts(runner: GateRunner, queue: TaskQueue) -> Self {
        Self { runner, queue }
    }

    fn already_passed(&self, phase: u8) -> Result<bool, GateError> {
        Ok(self.runner.gate_passed(phase)? || self.runner.log().ever_passed(phase)?)
    }

    /// Check each trigger once, running any gate that is due.
    pub async fn poll_once(&self) -> Result<Vec<GateResult>, GateError> {
        let mut fired = Vec::new();

        let progress = self.queue.progress()?;

        if progress.total > 0
            && progress.is_complete()
            && !self.already_passed(IMPLEMENTATION_PHASE)?
        {
            match self
                .runner
                .run_gate(IMPLEMENTATION_PHASE, GateTrigger::QueueComplete, false)
                .await
            {
                Ok(result) => fired.push(result),
                Err(GateError::PreviousGateNotPassed { phase, previous }) => {
                    debug!(phase, previous, "Queue complete but earlier gate still open");
                }
                Err(e) => return Err(e),
            }
        }

        if self.runner.gate_passed(IMPLEMENTATION_PHASE)?
            && !self.already_passed(VERIFICATION_PHASE)?
        {
            fired.push(
                self.runner
                    .run_gate(VERIFICATION_PHASE, GateTrigger::PreviousGatePassed, false)
                    .await?,
            );
        }

        Ok(fired)
    }

    /// Poll until the verification gate has passed, a triggered gate fails,
    /// or `max_polls` checks have been made.
    pub async fn watch(
        &self,
        interval: Duration,
        max_polls: Option<usize>,
    ) -> Result<Vec<GateResult>, GateError> {
        let mut all = Vec::new();
        let mut polls = 0usize;

        loop {
            let fired = self.poll_once().await?;
            polls += 1;
            let failed = fired.iter().any(|r| !r.advanced());
            all.extend(fired);

            if failed || self.runner.gate_passed(VERIFICATION_PHASE)? {
                break;
            }
            if max_polls.is_some_and(|max| polls >= max) {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        Ok(all)
    }
}
