//! Resuming an interrupted orchestration.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `consistency` | Checkpoint vs. disk and git: components, commits, spec drift |
//! | `discovery` | Inferring progress from evidence when there is no checkpoint |
//! | `confirm` | Operator confirmation (interactive or fixed) |
//! | `coordinator` | `ResumeCoordinator`: load, recover, check, confirm, prepare |

pub mod confirm;
pub mod consistency;
pub mod coordinator;
pub mod discovery;

pub use confirm::{AutoConfirm, Confirmer, InteractiveConfirmer};
pub use consistency::{ConsistencyIssue, ConsistencyReport, check_consistency, component_dirs};
pub use coordinator::{ResumeCoordinator, ResumeDecision, ResumeOutcome, ResumePlan, ResumeSource};
pub use discovery::{Confidence, DiscoveredState, discover};
