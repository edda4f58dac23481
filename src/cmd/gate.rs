//! Phase gate commands: `pipewright gate ...`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::process::ExitCode;

use pipewright::gates::{GatePoller, GateResult, GateRunner, GateTrigger};
use pipewright::phase::{GATE_WARNINGS_KEY, GateOutcome, GateStatus, PHASE_COUNT};

use super::super::{Cli, GateCommands};
use super::{exit_code, load_config};

pub async fn cmd_gate(cli: &Cli, project_dir: &Path, command: GateCommands) -> Result<ExitCode> {
    let config = load_config(cli, project_dir)?;
    let runner = GateRunner::new(&config);

    match command {
        GateCommands::Start { phase, force } => {
            let started = runner.start_phase(phase, force)?;
            println!("Phase {} ({}) in progress", started.phase_number, started.name);
            Ok(ExitCode::SUCCESS)
        }
        GateCommands::Run { phase, force } => {
            let result = runner.run_gate(phase, GateTrigger::Manual, force).await?;
            print_result(&result);
            Ok(exit_code(result.advanced()))
        }
        GateCommands::Status => {
            let report = runner.status()?;

            println!();
            if report.current_phase as usize > PHASE_COUNT {
                println!("All {} gates passed.", PHASE_COUNT);
            } else {
                println!("Current phase: {}", report.current_phase);
            }
            println!();
            println!(
                "{:<6} {:<32} {:<12} {:<8} {:<9} Checker",
                "Phase", "Name", "Status", "Gate", "Mode"
            );
            println!(
                "{:<6} {:<32} {:<12} {:<8} {:<9} -------",
                "-----", "--------------------------------", "------------", "--------", "---------"
            );
            for entry in &report.phases {
                let gate = format!("{:<8}", entry.phase.gate_status.to_string());
                let gate = match entry.phase.gate_status {
                    GateStatus::Passed => style(gate).green().to_string(),
                    GateStatus::Failed => style(gate).red().to_string(),
                    GateStatus::Unset => style(gate).dim().to_string(),
                };
                println!(
                    "{:<6} {:<32} {:<12} {} {:<9} {}",
                    entry.phase.phase_number,
                    entry.phase.name,
                    entry.phase.status.to_string(),
                    gate,
                    if entry.blocking { "blocking" } else { "advisory" },
                    entry.checker.as_deref().unwrap_or("(none)")
                );
                if let Some(record) = &entry.last_record {
                    println!(
                        "       last run {} ({}, {} ms{})",
                        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        record.trigger,
                        record.duration_ms,
                        if record.timed_out { ", timed out" } else { "" }
                    );
                }
            }
            println!();
            Ok(ExitCode::SUCCESS)
        }
        GateCommands::Poll { watch, max_polls } => {
            let poller = GatePoller::new(&config);
            let fired = if watch {
                poller.watch(config.poll_interval(), max_polls).await?
            } else {
                poller.poll_once().await?
            };

            if fired.is_empty() {
                println!("No gate triggered.");
                return Ok(ExitCode::SUCCESS);
            }
            for result in &fired {
                print_result(result);
            }
            Ok(exit_code(fired.iter().all(GateResult::advanced)))
        }
    }
}

fn print_result(result: &GateResult) {
    let phase = result.record.phase;
    match &result.outcome {
        GateOutcome::Passed => {
            println!("{} Gate {} passed", style("✓").green(), phase);
        }
        GateOutcome::Waived { warning } => {
            println!("{} Gate {} failed (advisory): {}", style("!").yellow(), phase, warning);
        }
        GateOutcome::Failed => {
            println!("{} Gate {} failed", style("✗").red(), phase);
            if result.record.timed_out {
                println!("  checker timed out");
            }
            let stderr = result.record.stderr.trim();
            if !stderr.is_empty() {
                println!("{}", style(stderr).dim());
            }
        }
    }
    if result.record.checker.is_none() {
        println!("  (no checker registered; passed vacuously)");
    }
    if let Some(warnings) = result.phase.outputs.get(GATE_WARNINGS_KEY)
        && let Some(list) = warnings.as_array()
        && list.len() > 1
    {
        println!("  {} advisory warnings recorded on this phase", list.len());
    }
}
