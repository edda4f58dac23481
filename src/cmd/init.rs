//! `pipewright init`.

use anyhow::Result;
use std::path::Path;
use std::process::ExitCode;

use pipewright::init::init_project;

pub fn cmd_init(project_dir: &Path) -> Result<ExitCode> {
    let result = init_project(project_dir)?;

    println!();
    if result.created {
        println!("Initialized pipewright project at {}", result.state_dir.display());
    } else {
        println!("pipewright project already initialized at {}", result.state_dir.display());
    }
    println!();
    println!("Next steps:");
    println!("  1. Register gate checkers in .pipewright/pipewright.toml");
    println!("  2. Import tasks: pipewright task import <features.json>");
    println!("  3. Start an orchestration: pipewright checkpoint create \"<request>\"");
    println!();
    Ok(ExitCode::SUCCESS)
}
