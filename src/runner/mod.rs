//! Agent process execution.
//!
//! [`AgentRunner`] is the seam between the orchestrator and the external
//! agent. [`ProcessRunner`] is the real implementation; tests substitute
//! scripted runners.

mod context;
mod process;

pub use context::ContextBuilder;
pub use process::ProcessRunner;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::RunnerError;

/// Everything one agent invocation needs.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub session_path: PathBuf,
    pub working_dir: PathBuf,
    pub phase: String,
    pub agent: String,
    /// Rendered session context markdown.
    pub payload: String,
    /// In-process iteration counter.
    pub iteration_token: u64,
    /// 1-based attempt within the iteration.
    pub attempt: u32,
    /// Iteration as recorded in the overview.
    pub session_iteration: u32,
    pub log_file: PathBuf,
}

/// A completed invocation that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Number of stdout lines written to the log file.
    pub output_lines: u64,
    pub log_file: PathBuf,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        timeout: Duration,
    ) -> Result<ProcessResult, RunnerError>;
}
