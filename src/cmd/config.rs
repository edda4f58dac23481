//! Configuration view and validation commands: `pipewright config`.

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;

use pipewright::config::Config;
use pipewright::ecosystem::EcosystemRegistry;
use pipewright::init::STATE_DIR;
use pipewright::settings::{SETTINGS_FILE, Settings};

use super::super::ConfigCommands;
use super::exit_code;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<ExitCode> {
    let state_dir = project_dir.join(STATE_DIR);
    let config_path = state_dir.join(SETTINGS_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("pipewright Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}; using defaults.", SETTINGS_FILE, config_path.display());
            }
            println!();

            let config = Config::new(project_dir.to_path_buf(), false)?;
            let settings = &config.settings;

            println!("[project]");
            if let Some(name) = &settings.project.name {
                println!("  name = \"{}\"", name);
            }
            println!("  components_dir = \"{}\"", settings.project.components_dir);
            println!("  spec_files = {:?}", settings.project.spec_files);
            if let Some(cmd) = &settings.project.test_command {
                println!("  test_command = \"{}\"", cmd);
            }
            println!();

            let e = &settings.enforcement;
            println!("[enforcement]");
            println!("  blocking = {}", e.blocking);
            println!("  max_concurrent = {}", e.max_concurrent);
            println!("  gate_timeout_secs = {}", e.gate_timeout_secs);
            println!("  agent_timeout_secs = {}", e.agent_timeout_secs);
            println!("  git_timeout_secs = {}", e.git_timeout_secs);
            println!("  test_timeout_secs = {}", e.test_timeout_secs);
            println!("  poll_interval_ms = {}", e.poll_interval_ms);
            println!();

            if !settings.gates.is_empty() {
                println!("Gates:");
                for gate in &settings.gates {
                    println!(
                        "  phase {} {} \"{}\"{}",
                        gate.phase,
                        if gate.blocking { "blocking" } else { "advisory" },
                        gate.command,
                        gate.timeout_secs
                            .map(|t| format!(" (timeout {}s)", t))
                            .unwrap_or_default()
                    );
                }
                println!();
            }

            // Effective values include the environment layer.
            println!("Effective values (with env overrides):");
            println!("  agent_cmd = \"{}\"", settings.agent_cmd());
            println!();

            let ecosystems = EcosystemRegistry::with_defaults();
            match ecosystems.detect(&config.project_dir) {
                Some(eco) => {
                    println!("Detected ecosystem: {}", eco.name());
                    println!("  build = {}", eco.build_command().unwrap_or("-"));
                    println!("  test  = {}", eco.test_command().unwrap_or("-"));
                    println!("  lint  = {}", eco.lint_command().unwrap_or("-"));
                }
                None => println!(
                    "No ecosystem detected (known: {})",
                    ecosystems.names().join(", ")
                ),
            }
            println!();
            Ok(ExitCode::SUCCESS)
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", SETTINGS_FILE);
                return Ok(ExitCode::SUCCESS);
            }

            let settings = Settings::load(&config_path)?;
            let warnings = settings.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
            Ok(exit_code(warnings.is_empty()))
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", SETTINGS_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(ExitCode::SUCCESS);
            }

            if !state_dir.exists() {
                std::fs::create_dir_all(&state_dir)?;
            }
            Settings::default().save(&config_path)?;

            println!("Created {} at {}", SETTINGS_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] agent_cmd, components_dir, spec_files, test_command");
            println!("  - [enforcement] blocking, max_concurrent, timeouts");
            println!("  - [[gates]] phase, command, blocking, timeout_secs");
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}
