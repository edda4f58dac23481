//! `pipewright resume`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::process::ExitCode;

use pipewright::checkpoint::{CheckpointStatus, CheckpointStore, LoadOutcome};
use pipewright::resume::{
    AutoConfirm, Confirmer, InteractiveConfirmer, ResumeCoordinator, ResumeDecision, ResumePlan,
    ResumeSource,
};

use super::super::Cli;
use super::{exit_code, load_config};

pub async fn cmd_resume(cli: &Cli, project_dir: &Path, dry_run: bool) -> Result<ExitCode> {
    let config = load_config(cli, project_dir)?;

    // A stop marked auto-resumable needs no operator.
    let auto_resumable = matches!(
        CheckpointStore::new(&config).load(),
        LoadOutcome::Valid(cp) if cp.status == CheckpointStatus::Stopped
            && cp.stopping_context.as_ref().is_some_and(|c| c.can_auto_resume)
    );
    let inner: Box<dyn Confirmer> = if cli.yes || auto_resumable {
        Box::new(AutoConfirm(true))
    } else {
        Box::new(InteractiveConfirmer)
    };

    print_header();
    let coordinator = ResumeCoordinator::new(&config, Box::new(ShowPlan(inner)));
    let outcome = coordinator.resume(dry_run).await?;
    if matches!(
        outcome.decision,
        ResumeDecision::DryRun | ResumeDecision::NothingToResume
    ) {
        print_plan(&outcome.plan);
    }

    match outcome.decision {
        ResumeDecision::DryRun => {
            println!("Dry run: nothing was changed.");
            Ok(ExitCode::SUCCESS)
        }
        ResumeDecision::NothingToResume => {
            println!("Every phase is complete; nothing to resume.");
            Ok(ExitCode::SUCCESS)
        }
        ResumeDecision::Declined => {
            println!("Resume aborted.");
            Ok(exit_code(false))
        }
        ResumeDecision::Resumed {
            orchestration_id,
            reset_tasks,
            reclaimed_agents,
        } => {
            println!(
                "{} Resumed orchestration {}",
                style("✓").green(),
                style(orchestration_id).bold()
            );
            if !reset_tasks.is_empty() {
                println!("  reset to incomplete: {}", reset_tasks.join(", "));
            }
            if !reclaimed_agents.is_empty() {
                println!("  reclaimed stale agents: {}", reclaimed_agents.join(", "));
            }
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Prints the plan before delegating, so the operator sees what they approve.
struct ShowPlan(Box<dyn Confirmer>);

impl Confirmer for ShowPlan {
    fn confirm(&self, plan: &ResumePlan) -> Result<bool> {
        print_plan(plan);
        self.0.confirm(plan)
    }
}

fn print_header() {
    println!();
    println!("Resume");
    println!("======");
    println!();
}

fn print_plan(plan: &ResumePlan) {
    match &plan.source {
        ResumeSource::Checkpoint {
            orchestration_id,
            status,
            repaired_with,
            backup_path,
        } => {
            println!("Checkpoint: {} ({})", orchestration_id, status);
            if let Some(strategy) = repaired_with {
                println!("  repaired: {}", strategy);
            }
            if let Some(backup) = backup_path {
                println!("  backup:   {}", backup.display());
            }
        }
        ResumeSource::Discovery(state) => {
            println!("No usable checkpoint; discovered state:");
            println!("  components:  {}", state.components.len());
            println!(
                "  gates:       {}",
                if state.gates_passed.is_empty() {
                    "none passed".to_string()
                } else {
                    format!("passed through phase {}", state.gates_passed.len())
                }
            );
            if let Some(tests) = &state.tests {
                println!(
                    "  tests:       {} ({})",
                    if tests.passed { "passing" } else { "failing" },
                    tests.command
                );
            }
            println!("  commits:     {}", state.recent_commits.len());
            println!("  progress:    {:.0}%", state.progress_percentage);
            println!("  confidence:  {}", state.confidence);
        }
    }

    if let Some(ctx) = &plan.stopping_context {
        println!("Stopped because: {}", ctx.reason);
    }
    match plan.resume_phase {
        Some(phase) => println!("Resume phase: {}", phase),
        None => println!("Resume phase: (complete)"),
    }
    if !plan.in_flight_tasks.is_empty() {
        println!("In-flight tasks: {}", plan.in_flight_tasks.join(", "));
    }

    if !plan.warnings.is_empty() {
        println!();
        println!("{}", style("Warnings:").yellow());
        for warning in &plan.warnings {
            println!("  - {}", warning);
        }
    }
    println!();
}
