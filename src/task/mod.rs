//! Task queue with dependency-gated scheduling.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `model` | `Task`, `TaskStatus`, `TaskState` and the pure scheduling rules |
//! | `queue` | `TaskQueue`, the persisted operations over `tasks.json` |

pub mod model;
pub mod queue;

pub use model::{BlockReason, BlockedTask, Progress, Task, TaskImport, TaskState, TaskStatus};
pub use queue::TaskQueue;
