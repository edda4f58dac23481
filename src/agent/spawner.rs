//! Starting, observing and signalling agent processes.
//!
//! The launcher only talks to the [`Spawner`] trait. [`CommandSpawner`] runs
//! the configured agent command through `sh -c`; tests substitute a fake.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Environment variable carrying the liveness token.
pub const TOKEN_ENV: &str = "PIPEWRIGHT_AGENT_TOKEN";

/// Everything needed to start one agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub component: String,
    pub task_id: Option<String>,
    pub prompt: String,
    pub token: String,
    pub generation: u64,
    pub working_dir: PathBuf,
    pub log_path: PathBuf,
}

/// What is known about a recorded PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exited and reaped by this process; the code is `None` when killed by a signal
    Exited(Option<i32>),
    /// No process with this PID and token exists any more
    Gone,
}

pub trait Spawner: Send + Sync {
    /// Start the agent, returning its PID.
    fn spawn(&self, request: &AgentRequest) -> Result<u32>;

    fn state(&self, pid: u32, token: &str) -> ProcessState;

    /// Send a termination signal. Returns `false` when the process was already gone.
    fn terminate(&self, pid: u32) -> Result<bool>;
}

/// Runs the agent command as a detached shell process.
///
/// The prompt is written next to the log file and fed on stdin; stdout and
/// stderr both go to the log file. Children spawned by this instance are
/// reaped here; PIDs recorded by an earlier process are checked through
/// `/proc/<pid>/environ`.
pub struct CommandSpawner {
    agent_cmd: String,
    children: Mutex<HashMap<u32, Child>>,
}

impl CommandSpawner {
    pub fn new(agent_cmd: impl Into<String>) -> Self {
        Self {
            agent_cmd: agent_cmd.into(),
            children: Mutex::new(HashMap::new()),
        }
    }
}

impl Spawner for CommandSpawner {
    fn spawn(&self, request: &AgentRequest) -> Result<u32> {
        if let Some(parent) = request.log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let prompt_path = request.log_path.with_extension("prompt");
        fs::write(&prompt_path, &request.prompt)
            .with_context(|| format!("Failed to write prompt {}", prompt_path.display()))?;

        let stdin = File::open(&prompt_path)?;
        let stdout = File::create(&request.log_path)
            .with_context(|| format!("Failed to create log {}", request.log_path.display()))?;
        let stderr = stdout.try_clone()?;

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&self.agent_cmd)
            .current_dir(&request.working_dir)
            .env("PIPEWRIGHT_COMPONENT", &request.component)
            .env("PIPEWRIGHT_GENERATION", request.generation.to_string())
            .env(TOKEN_ENV, &request.token)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(task_id) = &request.task_id {
            command.env("PIPEWRIGHT_TASK_ID", task_id);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn agent: {}", self.agent_cmd))?;
        let pid = child.id();
        debug!(pid, component = %request.component, "Spawned agent");

        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, child);
        Ok(pid)
    }

    fn state(&self, pid: u32, token: &str) -> ProcessState {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(child) = children.get_mut(&pid) {
            return match child.try_wait() {
                Ok(None) => ProcessState::Running,
                Ok(Some(status)) => {
                    children.remove(&pid);
                    ProcessState::Exited(status.code())
                }
                Err(e) => {
                    warn!(pid, error = %e, "Failed to poll agent");
                    children.remove(&pid);
                    ProcessState::Gone
                }
            };
        }
        drop(children);

        if is_live(pid, token) {
            ProcessState::Running
        } else {
            ProcessState::Gone
        }
    }

    fn terminate(&self, pid: u32) -> Result<bool> {
        let sent = send_sigterm(pid)?;
        debug!(pid, sent, "Sent SIGTERM to agent");
        Ok(sent)
    }
}

/// Whether `pid` is alive and still carries `token`.
///
/// When the environment cannot be read (no procfs, or another user's
/// process) a bare existence check is all that is available.
pub fn is_live(pid: u32, token: &str) -> bool {
    match token_matches(Path::new("/proc"), pid, token) {
        Some(matches) => matches,
        None => process_exists(pid),
    }
}

/// `Some(true/false)` when the environment was readable, `None` otherwise.
fn token_matches(proc_root: &Path, pid: u32, token: &str) -> Option<bool> {
    let environ = fs::read(proc_root.join(pid.to_string()).join("environ")).ok()?;
    let expected = format!("{}={}", TOKEN_ENV, token);
    Some(
        environ
            .split(|b| *b == 0)
            .any(|entry| entry == expected.as_bytes()),
    )
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to send SIGTERM to {}", pid)),
    }
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) -> Result<bool> {
    anyhow::bail!("Terminating agent {} is only supported on unix", pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn request(dir: &Path, token: &str) -> AgentRequest {
        AgentRequest {
            component: "auth".into(),
            task_id: Some("T-1".into()),
            prompt: "build the auth component".into(),
            token: token.into(),
            generation: 1,
            working_dir: dir.to_path_buf(),
            log_path: dir.join("logs/auth-1.log"),
        }
    }

    fn wait_for_exit(spawner: &CommandSpawner, pid: u32, token: &str) -> ProcessState {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let state = spawner.state(pid, token);
            if state != ProcessState::Running || Instant::now() > deadline {
                return state;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_prompt_on_stdin_output_to_log() {
        let dir = tempdir().unwrap();
        let spawner = CommandSpawner::new("cat; echo \"task=$PIPEWRIGHT_TASK_ID\"");
        let req = request(dir.path(), "tok");
        let pid = spawner.spawn(&req).unwrap();

        assert_eq!(wait_for_exit(&spawner, pid, "tok"), ProcessState::Exited(Some(0)));
        let log = fs::read_to_string(&req.log_path).unwrap();
        assert!(log.contains("build the auth component"));
        assert!(log.contains("task=T-1"));
    }

    #[test]
    fn test_exit_code_is_reported() {
        let dir = tempdir().unwrap();
        let spawner = CommandSpawner::new("exit 3");
        let pid = spawner.spawn(&request(dir.path(), "tok")).unwrap();
        assert_eq!(wait_for_exit(&spawner, pid, "tok"), ProcessState::Exited(Some(3)));
        // Reaped; the PID is no longer ours.
        assert_ne!(spawner.state(pid, "tok"), ProcessState::Running);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_token_is_checked_through_procfs() {
        let dir = tempdir().unwrap();
        let spawner = CommandSpawner::new("sleep 30");
        let pid = spawner.spawn(&request(dir.path(), "secret-token")).unwrap();

        assert!(is_live(pid, "secret-token"));
        assert!(!is_live(pid, "someone-else"));

        assert!(spawner.terminate(pid).unwrap());
        assert_eq!(wait_for_exit(&spawner, pid, "secret-token"), ProcessState::Exited(None));
    }

    #[test]
    fn test_token_matches_reads_environ_entries() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("42")).unwrap();
        fs::write(
            dir.path().join("42/environ"),
            b"PATH=/bin\0PIPEWRIGHT_AGENT_TOKEN=abc\0HOME=/root\0",
        )
        .unwrap();
        assert_eq!(token_matches(dir.path(), 42, "abc"), Some(true));
        assert_eq!(token_matches(dir.path(), 42, "ab"), Some(false));
        assert_eq!(token_matches(dir.path(), 43, "abc"), None);
    }
}
