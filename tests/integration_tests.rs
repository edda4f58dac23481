//! Integration tests for pipewright
//!
//! These drive the binary end to end against temporary projects.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a pipewright Command
fn pipewright() -> Command {
    let mut cmd = cargo_bin_cmd!("pipewright");
    cmd.env_remove("PIPEWRIGHT_AGENT_CMD").env_remove("PIPEWRIGHT_LOG");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Helper to initialize a pipewright project in a temp directory
fn init_project(dir: &TempDir) {
    pipewright()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

fn write_settings(dir: &TempDir, content: &str) {
    fs::write(dir.path().join(".pipewright/pipewright.toml"), content).unwrap();
}

fn run(dir: &TempDir, args: &[&str]) -> assert_cmd::assert::Assert {
    pipewright().current_dir(dir.path()).args(args).assert()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        pipewright().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        pipewright().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        pipewright()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized pipewright project"));

        assert!(dir.path().join(".pipewright").is_dir());
        assert!(dir.path().join(".pipewright/logs").is_dir());
        assert!(dir.path().join(".pipewright/pipewright.toml").is_file());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        pipewright()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_commands_require_init() {
        let dir = create_temp_project();

        run(&dir, &["task", "status"])
            .failure()
            .stderr(predicate::str::contains("not initialized"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        init_project(&dir);
        let elsewhere = create_temp_project();

        pipewright()
            .current_dir(elsewhere.path())
            .arg("--project-dir")
            .arg(dir.path())
            .args(["task", "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No tasks"));
    }
}

// =============================================================================
// Task Queue
// =============================================================================

mod tasks {
    use super::*;

    #[test]
    fn test_add_and_status() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["task", "add", "A", "Build parser"]).success();
        run(&dir, &["task", "add", "B", "Wire CLI", "--deps", "A"]).success();

        run(&dir, &["task", "status"])
            .success()
            .stdout(predicate::str::contains("0/2 completed"))
            .stdout(predicate::str::contains("Build parser"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["task", "add", "A", "one"]).success();
        run(&dir, &["task", "add", "A", "two"])
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_import_and_dependency_order() {
        let dir = create_temp_project();
        init_project(&dir);
        let file = dir.path().join("features.json");
        fs::write(
            &file,
            r#"{"tasks": [
                {"id": "api", "name": "API", "dependencies": ["db"]},
                {"id": "db", "name": "Database"}
            ]}"#,
        )
        .unwrap();

        run(&dir, &["task", "import", file.to_str().unwrap()])
            .success()
            .stdout(predicate::str::contains("Imported 2 tasks"));

        let out = run(&dir, &["task", "current"]).success().get_output().stdout.clone();
        let next: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(next["id"], "db");
        assert_eq!(next["name"], "Database");
        assert_eq!(next["status"], "pending");

        run(&dir, &["task", "start", "api"])
            .failure()
            .stderr(predicate::str::contains("dependencies not completed"));

        run(&dir, &["task", "start", "db"]).success();
        run(&dir, &["task", "complete", "db", "--result", r#"{"tests": "ok"}"#]).success();

        run(&dir, &["task", "current"])
            .success()
            .stdout(predicate::str::contains("api"));
    }

    #[test]
    fn test_current_fails_when_queue_done() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["task", "add", "A", "only"]).success();
        run(&dir, &["task", "complete", "A"]).success();

        run(&dir, &["task", "current"])
            .failure()
            .stdout(predicate::str::diff("null\n"))
            .stderr(predicate::str::contains("All tasks completed"));
    }

    #[test]
    fn test_blocked_lists_missing_dependency() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["task", "add", "A", "orphan", "--deps", "ghost"]).success();

        run(&dir, &["task", "blocked"])
            .failure()
            .stdout(predicate::str::contains("ghost"));
    }

    #[test]
    fn test_reset_single_and_clear() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["task", "add", "A", "one"]).success();
        run(&dir, &["task", "start", "A"]).success();

        run(&dir, &["task", "reset", "A", "--reason", "agent crashed"])
            .success()
            .stdout(predicate::str::contains("incomplete"));

        run(&dir, &["task", "reset", "--force"])
            .success()
            .stdout(predicate::str::contains("Cleared 1 tasks"));
        run(&dir, &["task", "status"])
            .success()
            .stdout(predicate::str::contains("No tasks"));
    }
}

// =============================================================================
// Phase Gates
// =============================================================================

mod gates {
    use super::*;

    #[test]
    fn test_unregistered_gate_passes_vacuously() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["gate", "run", "1"])
            .success()
            .stdout(predicate::str::contains("Gate 1 passed"))
            .stdout(predicate::str::contains("passed vacuously"));
    }

    #[test]
    fn test_gate_sequence_enforced() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["gate", "run", "3"]).failure();
        run(&dir, &["gate", "run", "3", "--force"]).success();
    }

    #[test]
    fn test_blocking_gate_failure_exits_nonzero() {
        let dir = create_temp_project();
        init_project(&dir);
        write_settings(
            &dir,
            r#"
[[gates]]
phase = 1
command = "echo 'spec incomplete' >&2; exit 3"
"#,
        );

        run(&dir, &["gate", "run", "1"])
            .failure()
            .stdout(predicate::str::contains("Gate 1 failed"))
            .stdout(predicate::str::contains("spec incomplete"));

        run(&dir, &["gate", "run", "2"]).failure();
    }

    #[test]
    fn test_advisory_gate_failure_advances() {
        let dir = create_temp_project();
        init_project(&dir);
        write_settings(
            &dir,
            r#"
[[gates]]
phase = 1
command = "exit 1"
blocking = false
"#,
        );

        run(&dir, &["gate", "run", "1"])
            .success()
            .stdout(predicate::str::contains("advisory"));
        run(&dir, &["gate", "run", "2"]).success();
    }

    #[test]
    fn test_status_lists_phases() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["gate", "run", "1"]).success();

        run(&dir, &["gate", "status"])
            .success()
            .stdout(predicate::str::contains("Current phase: 2"))
            .stdout(predicate::str::contains("Specification Analysis"))
            .stdout(predicate::str::contains("Integration & Verification"));
    }

    #[test]
    fn test_poll_runs_implementation_and_verification_gates() {
        let dir = create_temp_project();
        init_project(&dir);
        for phase in ["1", "2", "3", "4"] {
            run(&dir, &["gate", "run", phase]).success();
        }

        run(&dir, &["gate", "poll"])
            .success()
            .stdout(predicate::str::contains("No gate triggered"));

        run(&dir, &["task", "add", "A", "only"]).success();
        run(&dir, &["task", "complete", "A"]).success();

        run(&dir, &["gate", "poll"])
            .success()
            .stdout(predicate::str::contains("Gate 5 passed"))
            .stdout(predicate::str::contains("Gate 6 passed"));

        run(&dir, &["gate", "poll"])
            .success()
            .stdout(predicate::str::contains("No gate triggered"));
    }
}

// =============================================================================
// Checkpoints and Resume
// =============================================================================

mod checkpoints {
    use super::*;

    #[test]
    fn test_create_show_and_complete() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["checkpoint", "create", "build a todo app", "--components", "api,web"])
            .success()
            .stdout(predicate::str::contains("Created orchestration orch-"));

        run(&dir, &["checkpoint", "show"])
            .success()
            .stdout(predicate::str::contains("build a todo app"))
            .stdout(predicate::str::contains("api"));

        run(&dir, &["checkpoint", "complete"]).success();
        run(&dir, &["checkpoint", "show", "--json"])
            .success()
            .stdout(predicate::str::contains("\"status\": \"completed\""));
    }

    #[test]
    fn test_show_without_checkpoint_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["checkpoint", "show"])
            .failure()
            .stdout(predicate::str::contains("No checkpoint"));
    }

    #[test]
    fn test_component_update() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["checkpoint", "create", "req", "--components", "api"]).success();

        run(&dir, &["checkpoint", "component", "api", "completed", "--tests-passing", "true"])
            .success();
        run(&dir, &["checkpoint", "show"])
            .success()
            .stdout(predicate::str::contains("tests passing"));

        run(&dir, &["checkpoint", "component", "api", "sideways"]).failure();
    }

    #[test]
    fn test_recover_corrupted_checkpoint() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["checkpoint", "create", "req"]).success();

        let path = dir.path().join(".pipewright/checkpoint.json");
        let text = fs::read_to_string(&path).unwrap();
        fs::write(&path, format!("{}{}", text, &text[..text.len() / 2])).unwrap();

        run(&dir, &["checkpoint", "show"]).failure();
        run(&dir, &["checkpoint", "recover"])
            .success()
            .stdout(predicate::str::contains("Recovered orchestration"));
        run(&dir, &["checkpoint", "show"]).success();
    }

    #[test]
    fn test_resume_stopped_checkpoint() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["checkpoint", "create", "req"]).success();
        run(&dir, &["gate", "run", "1"]).success();
        run(&dir, &["checkpoint", "stop", "operator interrupt"]).success();

        run(&dir, &["resume", "--dry-run"])
            .success()
            .stdout(predicate::str::contains("Resume phase: 2"))
            .stdout(predicate::str::contains("Dry run"));

        run(&dir, &["checkpoint", "show", "--json"])
            .success()
            .stdout(predicate::str::contains("\"status\": \"stopped\""));

        run(&dir, &["resume", "--yes"])
            .success()
            .stdout(predicate::str::contains("Resumed orchestration"));

        run(&dir, &["checkpoint", "show", "--json"])
            .success()
            .stdout(predicate::str::contains("\"status\": \"in_progress\""));
    }

    #[test]
    fn test_resume_resets_in_flight_tasks() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["checkpoint", "create", "req"]).success();
        run(&dir, &["task", "add", "A", "one"]).success();
        run(&dir, &["task", "start", "A"]).success();

        run(&dir, &["resume", "--yes"])
            .success()
            .stdout(predicate::str::contains("reset to incomplete: A"));
    }

    #[test]
    fn test_resume_without_checkpoint_uses_discovery() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["resume", "--dry-run"])
            .success()
            .stdout(predicate::str::contains("discovered state"))
            .stdout(predicate::str::contains("confidence"));

        assert!(!dir.path().join(".pipewright/checkpoint.json").exists());
    }
}

// =============================================================================
// Agents
// =============================================================================

mod agents {
    use super::*;

    #[test]
    fn test_run_drives_queue_to_completion() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["task", "add", "A", "first"]).success();
        run(&dir, &["task", "add", "B", "second", "--deps", "A"]).success();

        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_AGENT_CMD", "cat > /dev/null; exit 0")
            .args(["agent", "run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Completed: 2"));

        run(&dir, &["task", "status"])
            .success()
            .stdout(predicate::str::contains("2/2 completed"));
    }

    #[test]
    fn test_run_reports_failing_agent() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["task", "add", "A", "doomed"]).success();

        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_AGENT_CMD", "exit 2")
            .args(["agent", "run", "--max-attempts", "1"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("Failed: A"));
    }

    #[test]
    fn test_launch_and_status() {
        let dir = create_temp_project();
        init_project(&dir);

        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_AGENT_CMD", "sleep 30")
            .args(["agent", "launch", "api"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Started agent for api"));

        run(&dir, &["agent", "status"])
            .success()
            .stdout(predicate::str::contains("1/3 slots in use"));

        run(&dir, &["agent", "launch", "api"])
            .failure()
            .stderr(predicate::str::contains("already has an active or queued agent"));

        run(&dir, &["agent", "terminate", "api"]).success();
        run(&dir, &["agent", "status"])
            .success()
            .stdout(predicate::str::contains("0/3 slots in use"));
    }

    #[test]
    fn test_launch_queues_when_full() {
        let dir = create_temp_project();
        init_project(&dir);

        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_AGENT_CMD", "sleep 30")
            .args(["--max-concurrent", "1", "agent", "launch", "api"])
            .assert()
            .success();

        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_AGENT_CMD", "sleep 30")
            .args(["--max-concurrent", "1", "agent", "launch", "web"])
            .assert()
            .success()
            .stdout(predicate::str::contains("queued at position 1"));

        run(&dir, &["--max-concurrent", "1", "agent", "terminate", "web"])
            .success()
            .stdout(predicate::str::contains("Removed web from the queue"));
        run(&dir, &["--max-concurrent", "1", "agent", "terminate", "api"]).success();
    }

    #[test]
    fn test_terminate_unknown_component() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["agent", "terminate", "nobody"])
            .failure()
            .stderr(predicate::str::contains("No agent recorded"));
    }
}

// =============================================================================
// Hooks
// =============================================================================

mod hooks {
    use super::*;

    #[test]
    fn test_clean_project_allows() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["hook", "pre-commit"]).success();
        run(&dir, &["hook", "pre-push"]).success();
        run(&dir, &["hook", "post-commit"]).success();
    }

    #[test]
    fn test_blocked_task_blocks_commit() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["task", "add", "A", "orphan", "--deps", "ghost"]).success();

        run(&dir, &["hook", "pre-commit"])
            .failure()
            .stderr(predicate::str::contains("blocked:"));
    }

    #[test]
    fn test_non_blocking_mode_warns() {
        let dir = create_temp_project();
        init_project(&dir);
        write_settings(&dir, "[enforcement]\nblocking = false\n");
        run(&dir, &["task", "add", "A", "orphan", "--deps", "ghost"]).success();

        run(&dir, &["hook", "pre-commit"])
            .success()
            .stderr(predicate::str::contains("warning:"));
    }

    #[test]
    fn test_stopped_checkpoint_is_advisory() {
        let dir = create_temp_project();
        init_project(&dir);
        run(&dir, &["checkpoint", "create", "req"]).success();
        run(&dir, &["checkpoint", "stop", "out of budget"]).success();

        run(&dir, &["hook", "pre-push"])
            .success()
            .stderr(predicate::str::contains("pipewright resume"));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let dir = create_temp_project();
        init_project(&dir);

        run(&dir, &["hook", "pre-rebase"])
            .failure()
            .stderr(predicate::str::contains("Invalid hook event"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        run(&dir, &["config", "show"])
            .success()
            .stdout(predicate::str::contains("max_concurrent = 3"))
            .stdout(predicate::str::contains("using defaults"));
    }

    #[test]
    fn test_config_show_reads_env_agent_cmd() {
        let dir = create_temp_project();
        init_project(&dir);

        pipewright()
            .current_dir(dir.path())
            .env("PIPEWRIGHT_AGENT_CMD", "my-agent --fast")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("agent_cmd = \"my-agent --fast\""));
    }

    #[test]
    fn test_config_validate_reports_bad_gate() {
        let dir = create_temp_project();
        init_project(&dir);
        write_settings(&dir, "[[gates]]\nphase = 9\ncommand = \"true\"\n");

        run(&dir, &["config", "validate"])
            .failure()
            .stdout(predicate::str::contains("out of range"));
    }

    #[test]
    fn test_config_init_creates_file_once() {
        let dir = create_temp_project();

        run(&dir, &["config", "init"])
            .success()
            .stdout(predicate::str::contains("Created pipewright.toml"));
        assert!(dir.path().join(".pipewright/pipewright.toml").is_file());

        run(&dir, &["config", "init"])
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = create_temp_project();
        init_project(&dir);
        write_settings(&dir, "[enforcement\nblocking = ");

        run(&dir, &["task", "status"])
            .failure()
            .stderr(predicate::str::contains("pipewright.toml"));
    }
}
