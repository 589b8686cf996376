use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod cmd;

#[derive(Parser)]
#[command(name = "specforge")]
#[command(version, about = "Drive agent-generated specs through validated, reviewed, approval-gated phases")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Project slug (defaults to the only project in the directory)
    #[arg(long, global = true, env = "SPECFORGE_PROJECT")]
    pub project: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a project at the first phase with every gate pending
    Init {
        slug: String,
        /// Display name (defaults to [project] name in specforge.toml, then the slug)
        #[arg(long)]
        name: Option<String>,
    },
    /// Show the project's position in the pipeline
    Status,
    /// List the phase registry
    Phases,
    /// Generate the current stage (or one phase of it)
    Run {
        #[arg(short, long)]
        phase: Option<String>,
    },
    /// Move past the current stage once its gates and artifacts allow it
    Advance,
    /// List approval gates and their status
    Gates,
    /// Approve a gate
    Approve {
        gate: String,
        #[arg(long)]
        approver: String,
        /// Review score 0-100; at or above the gate threshold the gate is auto-approved
        #[arg(long)]
        score: Option<u32>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a gate
    Reject {
        gate: String,
        #[arg(long = "by")]
        rejected_by: String,
        #[arg(long)]
        reason: String,
    },
    /// Revert the project to an earlier phase (preview unless --confirm)
    Rollback {
        phase: String,
        #[arg(long)]
        confirm: bool,
    },
    /// List rollback snapshots
    Snapshots,
    /// Re-insert the artifacts captured by a snapshot
    Restore { snapshot_id: String },
    /// Classify a failure message and show the remediation strategy
    Classify {
        #[arg(long)]
        phase: String,
        message: String,
    },
    /// Manage pre-generation clarification questions
    Clarify {
        #[command(subcommand)]
        command: ClarifyCommands,
    },
    /// Show the audit trail
    Audit {
        /// Only show the last N events
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ClarifyCommands {
    /// List questions and their resolution
    List,
    /// Add a question
    Add {
        question: String,
        #[arg(long, default_value = "general")]
        category: String,
        /// Suggested answer (repeatable); the first one is used by auto-resolution
        #[arg(long = "option")]
        options: Vec<String>,
    },
    /// Answer a question (prompts when no answer is given)
    Answer { id: String, answer: Option<String> },
    /// Let the AI resolve what the mode allows
    Auto {
        /// interactive, hybrid or auto (defaults to [clarification] mode)
        #[arg(long)]
        mode: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default specforge.toml file
    Init,
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_env("SPECFORGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let project = cli.project.as_deref();

    match &cli.command {
        Commands::Init { slug, name } => {
            cmd::cmd_init(&project_dir, cli.verbose, slug, name.as_deref()).await?
        }
        Commands::Status => cmd::cmd_status(&project_dir, cli.verbose, project).await?,
        Commands::Phases => cmd::cmd_phases(&project_dir)?,
        Commands::Run { phase } => {
            cmd::cmd_run(&project_dir, cli.verbose, project, phase.as_deref()).await?
        }
        Commands::Advance => cmd::cmd_advance(&project_dir, cli.verbose, project).await?,
        Commands::Gates => cmd::cmd_gates(&project_dir, cli.verbose, project).await?,
        Commands::Approve {
            gate,
            approver,
            score,
            notes,
        } => {
            cmd::cmd_approve(
                &project_dir,
                cli.verbose,
                project,
                gate,
                approver,
                *score,
                notes.as_deref(),
            )
            .await?
        }
        Commands::Reject {
            gate,
            rejected_by,
            reason,
        } => cmd::cmd_reject(&project_dir, cli.verbose, project, gate, rejected_by, reason).await?,
        Commands::Rollback { phase, confirm } => {
            cmd::cmd_rollback(&project_dir, cli.verbose, project, phase, *confirm).await?
        }
        Commands::Snapshots => cmd::cmd_snapshots(&project_dir, cli.verbose, project).await?,
        Commands::Restore { snapshot_id } => {
            cmd::cmd_restore(&project_dir, cli.verbose, project, snapshot_id).await?
        }
        Commands::Classify { phase, message } => cmd::cmd_classify(&project_dir, phase, message)?,
        Commands::Clarify { command } => {
            cmd::cmd_clarify(&project_dir, cli.verbose, project, command.clone()).await?
        }
        Commands::Audit { limit } => cmd::cmd_audit(&project_dir, cli.verbose, project, *limit).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
