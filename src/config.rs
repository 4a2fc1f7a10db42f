use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::retry::{Backoff, BackoffKind, RetryPolicy};

pub const DEFAULT_AGENT_CMD: &str = "claude";
pub const DEFAULT_MODEL: &str = "opus";
pub const DEFAULT_MAX_TURNS: u32 = 120;
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;
pub const DEFAULT_STALL_LIMIT: u32 = 10;

/// Telegram credentials; both values must be present to enable delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

/// Process-level settings resolved once from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub agent_cmd: String,
    pub model: String,
    pub max_turns: u32,
    pub skip_permissions: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub stall_limit: u32,
    pub branch_prefix: Option<String>,
    pub telegram: Option<TelegramCredentials>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent_cmd: DEFAULT_AGENT_CMD.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            skip_permissions: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::fixed(
                DEFAULT_MAX_RETRIES,
                Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            ),
            stall_limit: DEFAULT_STALL_LIMIT,
            branch_prefix: None,
            telegram: None,
        }
    }
}

impl RuntimeConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve through an arbitrary lookup, so tests never touch the real
    /// environment. Every invalid variable is reported, not just the first.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut errors = Vec::new();

        let agent_cmd = get("SHEPHERD_AGENT_CMD").unwrap_or_else(|| DEFAULT_AGENT_CMD.to_string());
        let model = get("SHEPHERD_AGENT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let max_turns = parse_or(&get, "SHEPHERD_MAX_TURNS", DEFAULT_MAX_TURNS, &mut errors);
        let skip_permissions = get("SHEPHERD_SKIP_PERMISSIONS")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let timeout_secs = parse_or(&get, "SHEPHERD_TIMEOUT", DEFAULT_TIMEOUT_SECS, &mut errors);
        let max_retries = parse_or(&get, "SHEPHERD_MAX_RETRIES", DEFAULT_MAX_RETRIES, &mut errors);
        let retry_delay = parse_or(
            &get,
            "SHEPHERD_RETRY_DELAY",
            DEFAULT_RETRY_DELAY_SECS,
            &mut errors,
        );
        let backoff_kind = parse_or(&get, "SHEPHERD_BACKOFF", BackoffKind::Fixed, &mut errors);
        let backoff_max = parse_or(
            &get,
            "SHEPHERD_BACKOFF_MAX",
            DEFAULT_BACKOFF_MAX_SECS,
            &mut errors,
        );
        let stall_limit = parse_or(&get, "SHEPHERD_STALL_LIMIT", DEFAULT_STALL_LIMIT, &mut errors);

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramCredentials { bot_token, chat_id }),
            _ => None,
        };

        let config = Self {
            agent_cmd,
            model,
            max_turns,
            skip_permissions,
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy::new(
                max_retries,
                match backoff_kind {
                    BackoffKind::Fixed => Backoff::Fixed(Duration::from_secs(retry_delay)),
                    BackoffKind::Exponential => Backoff::Exponential {
                        initial: Duration::from_secs(retry_delay),
                        max: Duration::from_secs(backoff_max),
                    },
                },
            ),
            stall_limit,
            branch_prefix: get("GIT_BRANCH_PREFIX"),
            telegram,
        };

        errors.extend(config.problems());
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.timeout.is_zero() {
            problems.push("SHEPHERD_TIMEOUT must be greater than 0".to_string());
        }
        if self.max_turns == 0 {
            problems.push("SHEPHERD_MAX_TURNS must be greater than 0".to_string());
        }
        if self.stall_limit == 0 {
            problems.push("SHEPHERD_STALL_LIMIT must be greater than 0".to_string());
        }
        problems
    }

    /// Flags passed to the agent on every invocation, before the per-call
    /// `--agent` and `--append-system-prompt` arguments.
    pub fn agent_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--model".to_string());
        flags.push(self.model.clone());
        flags.push("--max-turns".to_string());
        flags.push(self.max_turns.to_string());
        flags.push("--verbose".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T, errors: &mut Vec<String>) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            errors.push(format!("{}='{}': {}", key, raw, e));
            default
        }),
    }
}

/// The three working paths of a task, from a `KEY=value` task file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    /// Primary working area.
    pub main_repo: PathBuf,
    /// Root for isolated worktrees.
    pub worktrees: PathBuf,
    /// Root for session directories.
    pub sessions: PathBuf,
}

impl TaskConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse task file content. `path` is only used in error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let values = parse_key_values(content);

        let required = |key: &'static str| {
            values
                .get(key)
                .filter(|v| !v.is_empty())
                .map(|v| expand_home(v))
                .ok_or_else(|| ConfigError::MissingKey {
                    key,
                    path: path.to_path_buf(),
                })
        };

        Ok(Self {
            main_repo: required("MAIN_REPO")?,
            worktrees: required("WORKTREES")?,
            sessions: required("SESSIONS")?,
        })
    }
}

fn parse_key_values(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
