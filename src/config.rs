use anyhow::{Context, Result};
use glob::glob;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::init::STATE_DIR;
use crate::settings::Settings;

/// Runtime context for every pipewright component.
///
/// Built once from the project root and handed to each component constructor.
/// Nothing in the crate resolves the project directory from ambient state.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub tasks_file: PathBuf,
    pub checkpoint_file: PathBuf,
    pub gate_log_file: PathBuf,
    pub phases_file: PathBuf,
    pub agents_file: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub settings: Settings,
}

impl Config {
    /// Resolve the project directory and load `pipewright.toml` (or defaults).
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let settings = Settings::load_or_default(&project_dir.join(STATE_DIR))?;
        Ok(Self::with_settings(project_dir, settings, verbose))
    }

    /// Build a config with explicit settings, skipping the file lookup.
    pub fn with_settings(project_dir: PathBuf, settings: Settings, verbose: bool) -> Self {
        let state_dir = project_dir.join(STATE_DIR);
        Self {
            tasks_file: state_dir.join("tasks.json"),
            checkpoint_file: state_dir.join("checkpoint.json"),
            gate_log_file: state_dir.join("gate-log.json"),
            phases_file: state_dir.join("phases.json"),
            agents_file: state_dir.join("agents.json"),
            log_dir: state_dir.join("logs"),
            project_dir,
            state_dir,
            verbose,
            settings,
        }
    }

    /// Override the concurrency limit (CLI flag layer).
    pub fn with_max_concurrent(mut self, max_concurrent: Option<usize>) -> Self {
        if let Some(max) = max_concurrent {
            self.settings.enforcement.max_concurrent = max;
        }
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn components_dir(&self) -> PathBuf {
        self.project_dir.join(&self.settings.project.components_dir)
    }

    pub fn max_concurrent(&self) -> usize {
        self.settings.enforcement.max_concurrent
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.enforcement.gate_timeout_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.enforcement.agent_timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.enforcement.git_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.enforcement.test_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.enforcement.poll_interval_ms)
    }

    /// Expand the configured spec file patterns into existing files, sorted and deduplicated.
    pub fn spec_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in &self.settings.project.spec_files {
            let full = self.project_dir.join(pattern).to_string_lossy().to_string();
            for entry in glob(&full).with_context(|| format!("Bad spec file pattern: {}", pattern))? {
                if let Ok(path) = entry
                    && path.is_file()
                {
                    files.push(path);
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Path relative to the project root, for display and for storage in state files.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.project_dir).unwrap_or(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_paths_live_in_state_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.state_dir, root.join(".pipewright"));
        assert_eq!(config.tasks_file, root.join(".pipewright/tasks.json"));
        assert_eq!(config.checkpoint_file, root.join(".pipewright/checkpoint.json"));
        assert_eq!(config.gate_log_file, root.join(".pipewright/gate-log.json"));
        assert_eq!(config.agents_file, root.join(".pipewright/agents.json"));
    }

    #[test]
    fn test_config_reads_settings_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".pipewright")).unwrap();
        fs::write(
            dir.path().join(".pipewright/pipewright.toml"),
            "[enforcement]\nmax_concurrent = 7\n",
        )
        .unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.max_concurrent(), 7);
    }

    #[test]
    fn test_cli_override_wins() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false)
            .unwrap()
            .with_max_concurrent(Some(1));
        assert_eq!(config.max_concurrent(), 1);
    }

    #[test]
    fn test_spec_files_expands_patterns() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/api-spec.md"), "# API").unwrap();
        fs::write(dir.path().join("docs/notes.md"), "notes").unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let specs = config.spec_files().unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].ends_with("docs/api-spec.md"));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.state_dir.is_dir());
        assert!(config.log_dir.is_dir());
    }
}
