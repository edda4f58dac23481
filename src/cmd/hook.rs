//! `pipewright hook <event>`, called from git hooks.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::process::ExitCode;

use pipewright::enforcement::{Enforcer, HookEvent, Verdict};

use super::super::Cli;
use super::load_config;

pub fn cmd_hook(cli: &Cli, project_dir: &Path, event: &str) -> Result<ExitCode> {
    let event: HookEvent = event.parse()?;
    let config = load_config(cli, project_dir)?;
    let report = Enforcer::new(&config).evaluate(event)?;

    // Hook output goes to stderr so git shows it.
    for finding in &report.findings {
        let label = match (finding.violation, report.verdict) {
            (true, Verdict::Block) => style("blocked:").red().bold(),
            _ => style("warning:").yellow(),
        };
        eprintln!("pipewright {} {} {}", event, label, finding.message);
    }
    if !report.recorded_components.is_empty() {
        eprintln!(
            "pipewright {}: recorded commit for {}",
            event,
            report.recorded_components.join(", ")
        );
    }
    if report.verdict == Verdict::Block {
        eprintln!("pipewright {}: set enforcement.blocking = false to downgrade to warnings", event);
    }

    Ok(ExitCode::from(report.verdict.exit_code()))
}
