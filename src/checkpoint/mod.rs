//! Orchestration checkpoints.
//!
//! One `checkpoint.json` per orchestration run, rewritten atomically at every
//! phase, component, stop and completion event. A checkpoint that fails
//! validation is reported as invalid rather than partially trusted; `recover`
//! repairs the known corruption shapes.

pub mod model;
pub mod store;

pub use model::{
    Checkpoint, CheckpointStatus, ComponentState, ComponentStatus, OriginalRequest, SCHEMA_VERSION,
    SpecFile, StoppingContext, sha256_hex,
};
pub use store::{CheckpointStore, LoadOutcome, RecoveryReport};
