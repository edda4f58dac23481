//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module       | Commands handled |
//! |--------------|------------------|
//! | `init`       | `Init`           |
//! | `task`       | `Task`           |
//! | `gate`       | `Gate`           |
//! | `checkpoint` | `Checkpoint`     |
//! | `resume`     | `Resume`         |
//! | `agent`      | `Agent`          |
//! | `hook`       | `Hook`           |
//! | `config`     | `Config`         |
//!
//! Every handler returns the process exit code: 0 for success or allowed,
//! 1 for failure, blocked or incomplete.

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;

use pipewright::config::Config;
use pipewright::init::is_initialized;

use super::Cli;

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod gate;
pub mod hook;
pub mod init;
pub mod resume;
pub mod task;

pub use agent::cmd_agent;
pub use checkpoint::cmd_checkpoint;
pub use config::cmd_config;
pub use gate::cmd_gate;
pub use hook::cmd_hook;
pub use init::cmd_init;
pub use resume::cmd_resume;
pub use task::cmd_task;

/// Runtime config for an initialized project, with CLI overrides applied.
pub(crate) fn load_config(cli: &Cli, project_dir: &Path) -> Result<Config> {
    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'pipewright init' first.");
    }
    Ok(Config::new(project_dir.to_path_buf(), cli.verbose)?.with_max_concurrent(cli.max_concurrent))
}

pub(crate) fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::from(1) }
}
