//! Typed error hierarchy for the Shepherd supervisor.
//!
//! One enum per subsystem:
//! - `ConfigError`: task file and environment resolution (fatal at startup)
//! - `ParseError`: overview document extraction
//! - `UnknownPhaseError`: lookups against the phase registry
//! - `RegistryError`: an inconsistent phase table
//! - `SignalError`: control signal missing or schema-invalid (transient)
//! - `RunnerError`: agent process spawn, timeout and exit failures (transient)
//! - `NotifyError`: outbound alert failures (always swallowed)
//! - `OrchestratorError`: failures outside the retry budget

use std::path::PathBuf;
use thiserror::Error;

/// Errors resolving runtime or task configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read task config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{key} is required in task config {path}")]
    MissingKey { key: &'static str, path: PathBuf },

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration errors:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Errors extracting structured state from the overview document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Overview is missing mandatory field '{0}'")]
    MissingField(&'static str),

    #[error("Overview field '{field}' is empty")]
    EmptyField { field: &'static str },
}

/// A phase name that is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown phase '{phase}'")]
pub struct UnknownPhaseError {
    pub phase: String,
}

/// A phase table that cannot drive a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Phase registry must contain at least one phase")]
    Empty,

    #[error("Duplicate phase '{phase}' in registry")]
    Duplicate { phase: String },

    #[error("Phase '{phase}' lists unknown successor '{successor}'")]
    UnknownSuccessor { phase: String, successor: String },

    #[error("Phase '{phase}' accepts no signals")]
    NoSignals { phase: String },

    #[error("Phase '{phase}' has an iteration limit of 0")]
    ZeroIterationLimit { phase: String },

    #[error("Phase registry has no terminal phase")]
    NoTerminal,
}

/// Errors reading the agent's control signal.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Agent exited without writing a signal to {path}")]
    Missing { path: PathBuf },

    #[error("Invalid signal: {0}")]
    Validation(String),

    #[error("Failed to access signal file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a single agent invocation.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn agent '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent timed out after {}s", .timeout.as_secs())]
    Timeout { timeout: std::time::Duration },

    #[error("Agent exited with code {}{}", display_code(.code), display_stderr(.stderr))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("Agent I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (killed by signal)".to_string())
}

fn display_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Errors delivering an outbound notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification request failed: {0}")]
    Http(reqwest::Error),

    #[error("Notification endpoint rejected message with status {status}")]
    Rejected { status: u16 },
}

/// The request URL carries the bot token, so it is dropped before the error
/// can reach a log line.
impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Http(err.without_url())
    }
}

/// Failures of the orchestrator that are not part of the per-iteration
/// retry budget (session directory unusable, overview unreadable).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Failed to prepare session directory {path}: {source}")]
    SessionDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read overview {path}: {source}")]
    OverviewRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
