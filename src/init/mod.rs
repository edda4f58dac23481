//! Project initialization.
//!
//! `pipewright init` creates the state directory:
//!
//! ```text
//! .pipewright/
//! ├── pipewright.toml  # Configuration (template)
//! ├── tasks.json       # Task queue state (created on first write)
//! ├── checkpoint.json  # Orchestration checkpoint (created by `checkpoint create`)
//! ├── gate-log.json    # Append-only gate execution log
//! ├── phases.json      # Phase ledger
//! ├── agents.json      # Agent registry
//! └── logs/            # Agent output and tracing logs
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::settings::{SETTINGS_FILE, Settings};

/// Name of the state directory under the project root.
pub const STATE_DIR: &str = ".pipewright";

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    pub state_dir: PathBuf,
    /// False when the directory already existed
    pub created: bool,
}

/// Initialize a project in the given directory. Idempotent: an existing
/// directory is completed, never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let state_dir = project_dir.join(STATE_DIR);
    let created = !state_dir.exists();

    std::fs::create_dir_all(state_dir.join("logs"))
        .with_context(|| format!("Failed to create directory: {}", state_dir.display()))?;

    let settings_file = state_dir.join(SETTINGS_FILE);
    if !settings_file.exists() {
        std::fs::write(&settings_file, Settings::template()).with_context(|| {
            format!("Failed to create {}: {}", SETTINGS_FILE, settings_file.display())
        })?;
    }

    Ok(InitResult { state_dir, created })
}

/// Check whether a project has been initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(STATE_DIR).is_dir()
}
