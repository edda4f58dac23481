//! Checkpoint commands: `pipewright checkpoint ...`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::process::ExitCode;

use pipewright::checkpoint::{Checkpoint, CheckpointStore, ComponentState, ComponentStatus, LoadOutcome};
use pipewright::phase::{GateStatus, PhaseStatus};
use pipewright::resume::component_dirs;

use super::super::{CheckpointCommands, Cli};
use super::{exit_code, load_config};

pub fn cmd_checkpoint(cli: &Cli, project_dir: &Path, command: CheckpointCommands) -> Result<ExitCode> {
    let config = load_config(cli, project_dir)?;
    let store = CheckpointStore::new(&config);

    match command {
        CheckpointCommands::Create { prompt, components } => {
            let components = if components.is_empty() {
                component_dirs(&config.components_dir())
            } else {
                components
            };
            let spec_files = config.spec_files()?;
            let checkpoint = store.create(&prompt, &spec_files, &components)?;

            println!("Created orchestration {}", style(&checkpoint.orchestration_id).bold());
            println!("  {} components, {} spec files", components.len(), spec_files.len());
            Ok(ExitCode::SUCCESS)
        }
        CheckpointCommands::Show { json } => match store.load() {
            LoadOutcome::Missing => {
                println!("No checkpoint. Run 'pipewright checkpoint create \"<request>\"'.");
                Ok(exit_code(false))
            }
            LoadOutcome::Invalid { reason } => {
                println!("{} {}", style("Checkpoint is invalid:").red(), reason);
                println!("Run 'pipewright checkpoint recover' to repair it.");
                Ok(exit_code(false))
            }
            LoadOutcome::Valid(checkpoint) => {
                if json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&checkpoint).context("Failed to serialize checkpoint")?
                    );
                } else {
                    print_checkpoint(&checkpoint);
                }
                Ok(ExitCode::SUCCESS)
            }
        },
        CheckpointCommands::Stop {
            reason,
            details,
            auto_resume,
        } => {
            let checkpoint = store.mark_stopped(&reason, details, auto_resume)?;
            println!("Stopped orchestration {}", checkpoint.orchestration_id);
            Ok(ExitCode::SUCCESS)
        }
        CheckpointCommands::Component {
            name,
            status,
            commit,
            tests_passing,
        } => {
            let status: ComponentStatus = status.parse().map_err(anyhow::Error::msg)?;
            let previous = store
                .load_valid()?
                .component_states
                .get(&name)
                .cloned()
                .unwrap_or_default();
            let state = ComponentState {
                status,
                last_commit: commit.or(previous.last_commit),
                tests_passing: tests_passing.or(previous.tests_passing),
            };
            store.update_component(&name, state)?;
            println!("Recorded component {}", name);
            Ok(ExitCode::SUCCESS)
        }
        CheckpointCommands::Complete => {
            let checkpoint = store.mark_completed()?;
            println!("Completed orchestration {}", checkpoint.orchestration_id);
            Ok(ExitCode::SUCCESS)
        }
        CheckpointCommands::Recover => {
            let report = store.recover()?;
            match report.strategy {
                None => println!("Checkpoint is valid; nothing to recover."),
                Some(strategy) => {
                    println!(
                        "Recovered orchestration {} ({})",
                        report.checkpoint.orchestration_id, strategy
                    );
                    if let Some(backup) = &report.backup_path {
                        println!("  corrupted original saved to {}", backup.display());
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_checkpoint(checkpoint: &Checkpoint) {
    println!();
    println!("Orchestration {}", style(&checkpoint.orchestration_id).bold());
    println!("  status:   {}", checkpoint.status);
    println!("  request:  {}", checkpoint.original_request.prompt);
    println!("  created:  {}", checkpoint.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  updated:  {}", checkpoint.last_updated.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ctx) = &checkpoint.stopping_context {
        println!("  stopped:  {} (auto-resume: {})", ctx.reason, ctx.can_auto_resume);
        if let Some(details) = &ctx.details {
            println!("            {}", details);
        }
    }
    println!();

    println!("Phases:");
    for phase in &checkpoint.phase_progress {
        let marker = match (phase.status, phase.gate_status) {
            (_, GateStatus::Passed) => style("✓").green(),
            (_, GateStatus::Failed) => style("✗").red(),
            (PhaseStatus::InProgress, _) => style("→").cyan(),
            _ => style("·").dim(),
        };
        println!("  {} {} {} ({})", marker, phase.phase_number, phase.name, phase.status);
    }

    if !checkpoint.component_states.is_empty() {
        println!();
        println!("Components:");
        for (name, state) in &checkpoint.component_states {
            let tests = match state.tests_passing {
                Some(true) => "tests passing",
                Some(false) => "tests failing",
                None => "tests unknown",
            };
            println!(
                "  {:<20} {:<12} {:<14} {}",
                name,
                format!("{:?}", state.status).to_lowercase(),
                tests,
                state.last_commit.as_deref().map(|c| &c[..c.len().min(8)]).unwrap_or("-")
            );
        }
    }
    println!();
}
