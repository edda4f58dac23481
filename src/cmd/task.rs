//! Task queue commands: `pipewright task ...`.

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;
use std::path::Path;
use std::process::ExitCode;

use pipewright::task::{Task, TaskImport, TaskQueue, TaskStatus};

use super::super::{Cli, TaskCommands};
use super::{exit_code, load_config};

pub fn cmd_task(cli: &Cli, project_dir: &Path, command: TaskCommands) -> Result<ExitCode> {
    let config = load_config(cli, project_dir)?;
    let queue = TaskQueue::new(&config);

    match command {
        TaskCommands::Status => {
            let state = queue.state()?;
            let progress = state.progress();

            println!();
            println!(
                "Tasks: {}/{} completed ({:.0}%)",
                progress.completed, progress.total, progress.percentage
            );
            println!(
                "  pending {}  incomplete {}  in progress {}  blocked {}",
                progress.pending, progress.incomplete, progress.in_progress, progress.blocked
            );
            println!();

            if state.tasks.is_empty() {
                println!("No tasks. Run 'pipewright task import <file>' to add some.");
                println!();
                return Ok(ExitCode::SUCCESS);
            }

            println!("{:<16} {:<12} {:<30} Dependencies", "Task", "Status", "Name");
            println!(
                "{:<16} {:<12} {:<30} ------------",
                "----------------", "------------", "------------------------------"
            );
            for task in &state.tasks {
                println!(
                    "{:<16} {:<12} {:<30} {}",
                    task.id,
                    styled_status(task.status),
                    task.name,
                    task.dependencies.join(", ")
                );
            }
            println!();
            Ok(ExitCode::SUCCESS)
        }
        TaskCommands::Current => {
            let next = queue.get_next_task()?;
            println!("{}", serde_json::to_string_pretty(&next)?);
            if next.is_some() {
                return Ok(ExitCode::SUCCESS);
            }
            if queue.is_complete()? {
                eprintln!("All tasks completed.");
            } else {
                eprintln!("No eligible task. Check 'pipewright task blocked'.");
            }
            Ok(exit_code(false))
        }
        TaskCommands::Add {
            id,
            name,
            description,
            deps,
            feature,
        } => {
            let mut task = Task::new(&id, name)
                .with_description(description)
                .with_dependencies(deps.into_iter().filter(|d| !d.is_empty()));
            if let Some(feature) = feature {
                task = task.with_feature(feature);
            }
            queue.add_task(task)?;
            println!("Added task {}", id);
            Ok(ExitCode::SUCCESS)
        }
        TaskCommands::Import { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let import: TaskImport = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse task list {}", file.display()))?;
            let source = file.display().to_string();
            let count = queue.add_tasks(import.into_tasks(), Some(&source))?;
            println!("Imported {} tasks from {}", count, source);

            let blocked = queue.blocked_tasks()?;
            if !blocked.is_empty() {
                println!(
                    "{} {} tasks can never start; see 'pipewright task blocked'",
                    style("Warning:").yellow(),
                    blocked.len()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        TaskCommands::Start { id } => {
            let task = queue.start_task(&id)?;
            println!("Started task {} ({})", task.id, task.name);
            Ok(ExitCode::SUCCESS)
        }
        TaskCommands::Complete { id, result } => {
            let result = result.map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)));
            queue.complete_task(&id, result)?;
            let progress = queue.progress()?;
            println!(
                "Completed task {} ({}/{} done)",
                id, progress.completed, progress.total
            );
            Ok(ExitCode::SUCCESS)
        }
        TaskCommands::Reset { id, reason, force } => match id {
            Some(id) => {
                let task = queue.reset_to_incomplete(&id, &reason)?;
                println!("Reset task {} to {}", task.id, task.status);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                if !force && !cli.yes && !confirm_clear()? {
                    println!("Reset cancelled");
                    return Ok(exit_code(false));
                }
                let removed = queue.clear()?;
                println!("Cleared {} tasks", removed);
                Ok(ExitCode::SUCCESS)
            }
        },
        TaskCommands::Blocked => {
            let blocked = queue.blocked_tasks()?;
            if blocked.is_empty() {
                println!("No blocked tasks.");
                return Ok(ExitCode::SUCCESS);
            }
            println!();
            println!("{}", style("Blocked tasks").red().bold());
            for b in &blocked {
                println!("  {:<16} {}", b.id, b.reason);
            }
            println!();
            Ok(exit_code(false))
        }
    }
}

fn confirm_clear() -> Result<bool> {
    use dialoguer::Confirm;

    Ok(Confirm::new()
        .with_prompt("This removes every task and the completion log. Are you sure?")
        .default(false)
        .interact()
        .unwrap_or(false))
}

fn styled_status(status: TaskStatus) -> String {
    let label = format!("{:<12}", status.as_str());
    match status {
        TaskStatus::Completed => style(label).green().to_string(),
        TaskStatus::InProgress => style(label).cyan().to_string(),
        TaskStatus::Incomplete => style(label).yellow().to_string(),
        TaskStatus::Blocked => style(label).red().to_string(),
        TaskStatus::Pending => style(label).dim().to_string(),
    }
}
