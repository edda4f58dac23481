use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version, about = "Build-pipeline control plane: tasks, phase gates, checkpoints and resume")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Maximum concurrent agents. Overrides pipewright.toml.
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new pipewright project
    Init,
    /// Inspect and drive the task queue
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Run and inspect phase gates
    Gate {
        #[command(subcommand)]
        command: GateCommands,
    },
    /// Manage the orchestration checkpoint
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },
    /// Resume an interrupted orchestration
    Resume {
        /// Report what would happen without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Launch and supervise code-generation agents
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Evaluate a git hook event (pre-commit, post-commit, pre-push)
    Hook { event: String },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum TaskCommands {
    /// Show queue progress and every task
    Status,
    /// Show the next eligible task
    Current,
    /// Add a single task
    Add {
        id: String,
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Comma-separated dependency ids
        #[arg(long, value_delimiter = ',')]
        deps: Vec<String>,
        #[arg(long)]
        feature: Option<String>,
    },
    /// Import tasks from an extracted feature list (JSON)
    Import { file: PathBuf },
    /// Mark a task in progress
    Start { id: String },
    /// Mark a task completed
    Complete {
        id: String,
        /// Verification result as JSON
        #[arg(long)]
        result: Option<String>,
    },
    /// Reset tasks. With an id, downgrade that task to incomplete; without, clear the queue.
    Reset {
        id: Option<String>,
        #[arg(long, default_value = "manual reset")]
        reason: String,
        /// Required to clear the whole queue
        #[arg(long)]
        force: bool,
    },
    /// List tasks that can never start
    Blocked,
}

#[derive(Subcommand, Clone)]
pub enum GateCommands {
    /// Mark a phase in progress
    Start {
        phase: u8,
        /// Skip the previous-gate check
        #[arg(long)]
        force: bool,
    },
    /// Run the gate checker for a phase
    Run {
        phase: u8,
        /// Skip the previous-gate check
        #[arg(long)]
        force: bool,
    },
    /// Show each phase with its gate status
    Status,
    /// Evaluate the automatic gate triggers
    Poll {
        /// Keep polling until the verification gate passes or a gate fails
        #[arg(long)]
        watch: bool,
        /// Stop watching after this many polls
        #[arg(long)]
        max_polls: Option<usize>,
    },
}

#[derive(Subcommand, Clone)]
pub enum CheckpointCommands {
    /// Start a new orchestration checkpoint
    Create {
        /// The original request
        prompt: String,
        /// Component names (default: directories under the components dir)
        #[arg(long, value_delimiter = ',')]
        components: Vec<String>,
    },
    /// Show the current checkpoint
    Show {
        #[arg(long)]
        json: bool,
    },
    /// Mark the orchestration stopped
    Stop {
        reason: String,
        #[arg(long)]
        details: Option<String>,
        /// Allow resuming without confirmation
        #[arg(long)]
        auto_resume: bool,
    },
    /// Record a component's status
    Component {
        name: String,
        /// pending, in_progress, completed or failed
        status: String,
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        tests_passing: Option<bool>,
    },
    /// Mark the orchestration completed
    Complete,
    /// Repair a corrupted checkpoint
    Recover,
}

#[derive(Subcommand, Clone)]
pub enum AgentCommands {
    /// Launch an agent for a component, or queue it when all slots are busy
    Launch {
        component: String,
        #[arg(long)]
        task: Option<String>,
        /// Higher runs first
        #[arg(long, default_value = "0")]
        priority: i32,
    },
    /// Show active, queued and recent agents
    Status,
    /// Stop an agent or drop it from the queue
    Terminate {
        component: String,
        /// Only terminate if the active agent is this launch
        #[arg(long)]
        generation: Option<u64>,
    },
    /// Drive the task queue to completion through agents
    Run {
        #[arg(long, default_value = "3")]
        max_attempts: u32,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default pipewright.toml file
    Init,
}

/// Stderr output filtered by `PIPEWRIGHT_LOG`, plus a daily file in the
/// project's log directory once the project is initialized.
fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if verbose { "pipewright=debug" } else { "pipewright=warn" };
    let stderr_filter =
        EnvFilter::try_from_env("PIPEWRIGHT_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pipewright.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("pipewright=debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = project_dir.join(pipewright::init::STATE_DIR).join("logs");
    let _guard = init_tracing(cli.verbose, log_dir.is_dir().then_some(log_dir.as_path()));

    let code = match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Task { command } => cmd::cmd_task(&cli, &project_dir, command.clone())?,
        Commands::Gate { command } => cmd::cmd_gate(&cli, &project_dir, command.clone()).await?,
        Commands::Checkpoint { command } => {
            cmd::cmd_checkpoint(&cli, &project_dir, command.clone())?
        }
        Commands::Resume { dry_run } => cmd::cmd_resume(&cli, &project_dir, *dry_run).await?,
        Commands::Agent { command } => cmd::cmd_agent(&cli, &project_dir, command.clone()).await?,
        Commands::Hook { event } => cmd::cmd_hook(&cli, &project_dir, event)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    };

    Ok(code)
}
