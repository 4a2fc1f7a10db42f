//! `shepherd run`: drive a session until it halts.

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use shepherd::config::{RuntimeConfig, TaskConfig};
use shepherd::logging::{self, LogFormat};
use shepherd::notify;
use shepherd::orchestrator::{ControlState, Orchestrator, OrchestratorSettings};
use shepherd::phase::PhaseRegistry;
use shepherd::runner::ProcessRunner;
use shepherd::session;

use super::super::SessionArgs;

pub struct RunOptions {
    pub timeout: Option<u64>,
    pub task: Option<String>,
    pub max_iterations: Option<u64>,
    pub log_format: LogFormat,
}

pub async fn cmd_run(target: &SessionArgs, options: RunOptions) -> Result<ExitCode> {
    let task = TaskConfig::load(&target.config)?;
    let mut runtime = RuntimeConfig::from_env().context("Invalid environment configuration")?;
    if let Some(secs) = options.timeout {
        runtime.timeout = Duration::from_secs(secs);
    }

    let session = session::open(&task.sessions, &target.session)?;
    let _guard = logging::init(options.log_format, Some(&session.session_log()))?;

    tracing::info!(
        session = %session.name,
        dir = %session.dir.display(),
        agent_cmd = %runtime.agent_cmd,
        timeout_secs = runtime.timeout.as_secs(),
        max_attempts = runtime.retry.max_attempts,
        "Resolved session"
    );

    let mut settings = OrchestratorSettings::from_config(&runtime);
    settings.max_iterations = options.max_iterations;
    settings.initial_task = options.task;

    let mut orchestrator = Orchestrator::new(
        PhaseRegistry::standard(),
        Arc::new(ProcessRunner::new(&runtime)),
        notify::from_config(&runtime),
        session.clone(),
        task,
        settings,
    );

    let outcome = orchestrator
        .run()
        .await
        .with_context(|| format!("Session {} failed", session.name))?;

    let label = match &outcome.state {
        ControlState::Done { .. } => console::style("DONE").green().bold(),
        ControlState::WaitingForHuman { .. } => console::style("WAITING").yellow().bold(),
        ControlState::Blocked { .. } | ControlState::Running => console::style("BLOCKED").red().bold(),
    };
    println!("{} {} ({} iterations)", label, outcome.state, outcome.iterations);
    println!("Session: {}", session.dir.display());

    Ok(outcome.exit_code())
}
