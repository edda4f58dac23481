//! Project configuration read from `.pipewright/pipewright.toml`.
//!
//! Layered the usual way: file → environment → CLI flags. Every section has
//! defaults, so a missing file or a partial file is always valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "my-service"
//! agent_cmd = "claude --print"
//! components_dir = "components"
//! spec_files = ["docs/*spec*.md"]
//!
//! [enforcement]
//! blocking = true
//! max_concurrent = 3
//! gate_timeout_secs = 600
//! agent_timeout_secs = 1800
//! git_timeout_secs = 30
//! test_timeout_secs = 300
//!
//! [[gates]]
//! phase = 5
//! command = "cargo test --workspace"
//!
//! [[gates]]
//! phase = 6
//! command = "./scripts/integration.sh"
//! blocking = false
//! timeout_secs = 1200
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::phase::PHASE_COUNT;

/// File name of the configuration file inside the state directory.
pub const SETTINGS_FILE: &str = "pipewright.toml";

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (defaults to the directory name)
    #[serde(default)]
    pub name: Option<String>,
    /// Command used to invoke the code-generation agent
    #[serde(default)]
    pub agent_cmd: Option<String>,
    /// Directory (relative to the project root) holding one subdirectory per component
    #[serde(default = "default_components_dir")]
    pub components_dir: String,
    /// Glob patterns (relative to the project root) locating specification files
    #[serde(default = "default_spec_files")]
    pub spec_files: Vec<String>,
    /// Explicit test command; when unset the detected ecosystem decides
    #[serde(default)]
    pub test_command: Option<String>,
}

fn default_components_dir() -> String {
    "components".to_string()
}

fn default_spec_files() -> Vec<String> {
    vec![".pipewright/spec.md".to_string(), "docs/*spec*.md".to_string()]
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: None,
            agent_cmd: None,
            components_dir: default_components_dir(),
            spec_files: default_spec_files(),
            test_command: None,
        }
    }
}

/// Enforcement, concurrency and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementSection {
    /// Whether hooks block (true) or only warn (false)
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    /// Maximum number of concurrently running agents
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Default timeout for gate checkers
    #[serde(default = "default_gate_timeout_secs")]
    pub gate_timeout_secs: u64,
    /// Timeout for a single agent run
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    /// Timeout for git operations
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
    /// Timeout for the test suite during state discovery
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    /// How often the task driver polls running agents
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_blocking() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    3
}

fn default_gate_timeout_secs() -> u64 {
    600
}

fn default_agent_timeout_secs() -> u64 {
    1800
}

fn default_git_timeout_secs() -> u64 {
    30
}

fn default_test_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for EnforcementSection {
    fn default() -> Self {
        Self {
            blocking: default_blocking(),
            max_concurrent: default_max_concurrent(),
            gate_timeout_secs: default_gate_timeout_secs(),
            agent_timeout_secs: default_agent_timeout_secs(),
            git_timeout_secs: default_git_timeout_secs(),
            test_timeout_secs: default_test_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// A checker registered for one phase gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateChecker {
    /// Phase number (1-6)
    pub phase: u8,
    /// Shell command run in the project root; exit 0 means pass
    pub command: String,
    /// Blocking gates stop advancement on failure; advisory gates only warn
    #[serde(default = "default_blocking")]
    pub blocking: bool,
    /// Per-gate timeout override
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// The complete pipewright.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub enforcement: EnforcementSection,
    #[serde(default)]
    pub gates: Vec<GateChecker>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse settings from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pipewright.toml")
    }

    /// Load from `<state_dir>/pipewright.toml`, or defaults when the file is absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(SETTINGS_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize pipewright.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command, with fallback to `PIPEWRIGHT_AGENT_CMD` and then `claude --print`.
    pub fn agent_cmd(&self) -> String {
        self.project
            .agent_cmd
            .clone()
            .or_else(|| std::env::var("PIPEWRIGHT_AGENT_CMD").ok())
            .unwrap_or_else(|| "claude --print".to_string())
    }

    /// The checker registered for a phase, if any. The last entry wins on duplicates.
    pub fn checker_for(&self, phase: u8) -> Option<&GateChecker> {
        self.gates.iter().rev().find(|g| g.phase == phase)
    }

    /// Validate the settings, returning human-readable warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.enforcement.max_concurrent == 0 {
            warnings.push("enforcement.max_concurrent is 0; no agent will ever start".to_string());
        }
        if self.enforcement.gate_timeout_secs == 0 {
            warnings.push("enforcement.gate_timeout_secs is 0; every gate will time out".to_string());
        }

        for gate in &self.gates {
            if gate.phase == 0 || gate.phase as usize > PHASE_COUNT {
                warnings.push(format!(
                    "gate for phase {} is out of range (expected 1-{})",
                    gate.phase, PHASE_COUNT
                ));
            }
            if gate.command.trim().is_empty() {
                warnings.push(format!("gate for phase {} has an empty command", gate.phase));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for gate in &self.gates {
            if !seen.insert(gate.phase) {
                warnings.push(format!(
                    "phase {} has more than one gate checker; the last one is used",
                    gate.phase
                ));
            }
        }

        warnings
    }

    /// Default file contents written by `pipewright config init`.
    pub fn template() -> &'static str {
        r#"[project]
# agent_cmd = "claude --print"
components_dir = "components"
spec_files = [".pipewright/spec.md", "docs/*spec*.md"]

[enforcement]
blocking = true
max_concurrent = 3
gate_timeout_secs = 600
agent_timeout_secs = 1800
git_timeout_secs = 30
test_timeout_secs = 300

# [[gates]]
# phase = 5
# command = "cargo test --workspace"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.enforcement.blocking);
        assert_eq!(settings.enforcement.max_concurrent, 3);
        assert_eq!(settings.enforcement.gate_timeout_secs, 600);
        assert_eq!(settings.project.components_dir, "components");
        assert!(settings.gates.is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let settings = Settings::parse(
            r#"
[enforcement]
max_concurrent = 5
"#,
        )
        .unwrap();
        assert_eq!(settings.enforcement.max_concurrent, 5);
        assert!(settings.enforcement.blocking);
        assert_eq!(settings.enforcement.agent_timeout_secs, 1800);
    }

    #[test]
    fn test_parse_gates() {
        let settings = Settings::parse(
            r#"
[[gates]]
phase = 5
command = "cargo test"

[[gates]]
phase = 6
command = "./integration.sh"
blocking = false
timeout_secs = 30
"#,
        )
        .unwrap();
        assert_eq!(settings.gates.len(), 2);
        let five = settings.checker_for(5).unwrap();
        assert!(five.blocking);
        assert!(five.timeout_secs.is_none());
        let six = settings.checker_for(6).unwrap();
        assert!(!six.blocking);
        assert_eq!(six.timeout_secs, Some(30));
        assert!(settings.checker_for(1).is_none());
    }

    #[test]
    fn test_template_parses() {
        let settings = Settings::parse(Settings::template()).unwrap();
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_bad_gates() {
        let settings = Settings::parse(
            r#"
[[gates]]
phase = 9
command = ""

[[gates]]
phase = 2
command = "true"

[[gates]]
phase = 2
command = "false"
"#,
        )
        .unwrap();
        let warnings = settings.validate();
        assert!(warnings.iter().any(|w| w.contains("out of range")));
        assert!(warnings.iter().any(|w| w.contains("empty command")));
        assert!(warnings.iter().any(|w| w.contains("more than one")));
        assert_eq!(settings.checker_for(2).unwrap().command, "false");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_or_default(dir.path()).unwrap();
        assert_eq!(settings.enforcement.max_concurrent, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let mut settings = Settings::default();
        settings.project.agent_cmd = Some("my-agent".into());
        settings.gates.push(GateChecker {
            phase: 3,
            command: "make plan-check".into(),
            blocking: true,
            timeout_secs: None,
        });
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.agent_cmd(), "my-agent");
        assert_eq!(loaded.gates, settings.gates);
    }
}
