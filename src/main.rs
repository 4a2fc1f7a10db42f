use clap::{Args, Parser, Subcommand};
use shepherd::logging::LogFormat;
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "shepherd")]
#[command(version, about = "Supervisor that drives an external agent through a multi-phase session")]
pub struct Cli {
    /// Log output format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Locates a session: the task file and the session identifier.
#[derive(Args, Clone)]
pub struct SessionArgs {
    /// Task file with MAIN_REPO, WORKTREES and SESSIONS
    #[arg(short, long, default_value = ".shepherd")]
    pub config: PathBuf,

    /// Session name or dated directory name
    #[arg(short, long)]
    pub session: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive a session until it is done, waiting for a human, or blocked
    Run {
        #[command(flatten)]
        target: SessionArgs,

        /// Per-invocation timeout in seconds (overrides SHEPHERD_TIMEOUT)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Task description for a new session
        #[arg(long)]
        task: Option<String>,

        /// Stop after this many iterations
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_iterations: Option<u64>,
    },
    /// Show the current state of a session
    Status {
        #[command(flatten)]
        target: SessionArgs,
    },
    /// Show the signal history of a session
    History {
        #[command(flatten)]
        target: SessionArgs,

        /// Only show the last N records
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// List the registered phases
    Phases,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Run {
            target,
            timeout,
            task,
            max_iterations,
        } => {
            cmd::cmd_run(
                target,
                cmd::RunOptions {
                    timeout: *timeout,
                    task: task.clone(),
                    max_iterations: *max_iterations,
                    log_format: cli.log_format,
                },
            )
            .await
        }
        Commands::Status { target } => cmd::cmd_status(target).map(|_| ExitCode::SUCCESS),
        Commands::History { target, limit } => {
            cmd::cmd_history(target, *limit).map(|_| ExitCode::SUCCESS)
        }
        Commands::Phases => {
            cmd::cmd_phases();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
