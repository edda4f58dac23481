//! Phase gates.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `log` | Append-only gate execution log (`gate-log.json`) |
//! | `runner` | `GateRunner`: sequencing, checker execution, phase ledger updates |
//! | `poller` | `GatePoller`: automatic triggers driven by queue progress |

pub mod log;
pub mod poller;
pub mod runner;

pub use log::{GateLog, GateRecord, GateTrigger};
pub use poller::GatePoller;
pub use runner::{GateResult, GateRunner, GateStatusReport, MAX_GATE_OUTPUT_BYTES, PhaseGateStatus};
