//! Agent commands: `pipewright agent ...`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::process::ExitCode;

use pipewright::agent::{AgentLauncher, LaunchOutcome, TaskDriver, TerminateOutcome};

use super::super::{AgentCommands, Cli};
use super::{exit_code, load_config};

pub async fn cmd_agent(cli: &Cli, project_dir: &Path, command: AgentCommands) -> Result<ExitCode> {
    let config = load_config(cli, project_dir)?;
    let launcher = AgentLauncher::new(&config);

    match command {
        AgentCommands::Launch {
            component,
            task,
            priority,
        } => {
            match launcher.launch(&component, task.as_deref(), priority)? {
                LaunchOutcome::Started { pid, generation } => {
                    println!(
                        "{} Started agent for {} (pid {}, generation {})",
                        style("✓").green(),
                        component,
                        pid,
                        generation
                    );
                }
                LaunchOutcome::Queued { position } => {
                    println!(
                        "All {} slots busy; {} queued at position {}",
                        launcher.max_concurrent(),
                        component,
                        position
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        AgentCommands::Status => {
            let reaped = launcher.reap()?;
            let status = launcher.status()?;

            println!();
            println!(
                "Agents: {}/{} slots in use, {} queued",
                status.active.len(),
                status.max_concurrent,
                status.queued.len()
            );
            println!();

            if !status.active.is_empty() {
                println!("Active:");
                for agent in &status.active {
                    println!(
                        "  {:<20} pid {:<8} gen {:<4} since {}{}",
                        agent.component,
                        agent.pid,
                        agent.generation,
                        agent.started_at.format("%H:%M:%S"),
                        agent
                            .task_id
                            .as_deref()
                            .map(|t| format!("  task {}", t))
                            .unwrap_or_default()
                    );
                }
                println!();
            }
            if !status.queued.is_empty() {
                println!("Queued:");
                for (i, queued) in status.queued.iter().enumerate() {
                    println!(
                        "  {}. {:<20} priority {}",
                        i + 1,
                        queued.component,
                        queued.priority
                    );
                }
                println!();
            }
            if !status.recent.is_empty() {
                println!("Recent:");
                for done in status.recent.iter().rev() {
                    let code = done
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {:<20} {:<12} exit {:<4} {}",
                        done.component,
                        done.outcome.to_string(),
                        code,
                        done.finished_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!();
            }
            if !reaped.is_empty() {
                println!("{} agents finished since the last check.", reaped.len());
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }
        AgentCommands::Terminate {
            component,
            generation,
        } => {
            let outcome = launcher.terminate(&component, generation)?;
            let ok = match outcome {
                TerminateOutcome::Signalled => {
                    println!("Sent SIGTERM to the agent for {}", component);
                    true
                }
                TerminateOutcome::AlreadyGone => {
                    println!("Agent for {} had already exited; slot freed", component);
                    true
                }
                TerminateOutcome::Dequeued => {
                    println!("Removed {} from the queue", component);
                    true
                }
                TerminateOutcome::GenerationMismatch { current } => {
                    println!(
                        "{} {} is now running generation {}; nothing terminated",
                        style("Skipped:").yellow(),
                        component,
                        current
                    );
                    false
                }
            };
            Ok(exit_code(ok))
        }
        AgentCommands::Run { max_attempts } => {
            let reclaimed = launcher.reclaim_stale()?;
            if !reclaimed.is_empty() {
                println!("Reclaimed stale agents: {}", reclaimed.join(", "));
            }

            let driver = TaskDriver::new(&config)
                .with_max_attempts(max_attempts)
                .with_progress();
            let report = driver.run().await?;

            println!();
            println!("Completed: {}", report.completed.len());
            if !report.failed.is_empty() {
                println!("{} {}", style("Failed:").red(), report.failed.join(", "));
            }
            if !report.timed_out.is_empty() {
                println!("{} {}", style("Timed out:").red(), report.timed_out.join(", "));
            }
            if !report.stalled_on.is_empty() {
                println!("Unfinished: {}", report.stalled_on.join(", "));
            }
            println!();
            Ok(exit_code(report.finished()))
        }
    }
}
