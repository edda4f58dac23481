//! Shell commands with a hard timeout.
//!
//! Gate checkers, test suites and agent commands all run through here. A
//! timeout is never an error: it comes back as `timed_out = true` with exit
//! code -1, and the child is killed.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Output from a finished (or timed-out) command.
#[derive(Debug, Clone)]
pub struct SubprocessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration: Duration,
}

impl SubprocessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Run `sh -c <cmd>` in `cwd` with extra environment variables.
pub async fn run_shell(
    cmd: &str,
    cwd: &Path,
    timeout: Duration,
    envs: &[(&str, &str)],
) -> Result<SubprocessOutput> {
    tracing::debug!(cmd, ?cwd, ?timeout, "spawning subprocess");
    let started = Instant::now();

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }

    let child = command
        .spawn()
        .with_context(|| format!("Failed to spawn: {}", cmd))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let result = SubprocessOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                timed_out: false,
                duration: started.elapsed(),
            };
            tracing::debug!(
                exit_code = result.exit_code,
                stdout_len = result.stdout.len(),
                "subprocess completed"
            );
            Ok(result)
        }
        Ok(Err(e)) => Err(e).with_context(|| format!("Subprocess failed: {}", cmd)),
        Err(_) => {
            tracing::warn!(cmd, ?timeout, "subprocess timed out");
            Ok(SubprocessOutput {
                stdout: String::new(),
                stderr: format!("Process timed out after {:?}", timeout),
                exit_code: -1,
                timed_out: true,
                duration: started.elapsed(),
            })
        }
    }
}
