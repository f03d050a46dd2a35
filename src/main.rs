use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "crossreview")]
#[command(
    version,
    about = "Drive an external review CLI over task documents and return a typed verdict"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root; defaults to the current directory
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Also write JSON logs to <DIR>/crossreview.log
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a review of task documents with the configured tool
    Review(ReviewArgs),
    /// Parse a review report file offline
    Report {
        /// Path to the report (markdown)
        file: PathBuf,
        /// Print the parsed report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List or prune session directories
    Sessions {
        #[command(subcommand)]
        command: Option<SessionsCommands>,
    },
    /// List configured review tools
    Tools {
        /// Probe each executable with --version
        #[arg(long)]
        check: bool,
    },
    /// View, validate or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args, Clone)]
pub struct ReviewArgs {
    /// Index document listing the task documents in order
    #[arg(long)]
    pub index: PathBuf,

    /// Task document, repeat in index order
    #[arg(long = "task", required = true)]
    pub tasks: Vec<PathBuf>,

    /// Prior requirement document
    #[arg(long)]
    pub requirement: Option<PathBuf>,

    /// Prior planning document
    #[arg(long)]
    pub planning: Option<PathBuf>,

    /// Who asked for the review, quoted in the prompt
    #[arg(long)]
    pub initiator: Option<String>,

    /// Launch attempts before a crash is final
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Tool to use instead of the configured one
    #[arg(long, env = "CROSSREVIEW_TOOL")]
    pub tool: Option<String>,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Clone)]
pub enum SessionsCommands {
    /// List sessions, newest first
    List,
    /// Delete all but the newest sessions
    Prune {
        /// Sessions to keep (defaults to the configured retention)
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any problems
    Validate,
    /// Write a default .crossreview/config.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _log_guard = crossreview::logging::init(cli.verbose, cli.log_dir.as_deref())?;
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let code = match &cli.command {
        Commands::Review(args) => cmd::cmd_review(&project_dir, &cli, args).await?,
        Commands::Report { file, json } => cmd::cmd_report(file, *json)?,
        Commands::Sessions { command } => cmd::cmd_sessions(&project_dir, &cli, command.clone())?,
        Commands::Tools { check } => cmd::cmd_tools(&project_dir, &cli, *check).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    };

    Ok(code)
}
