//! Session directory resolution and layout.
//!
//! A session lives in `SESSIONS/<YY-MM-DD>-<name>/`. A bare name resolves to
//! an existing dated directory when there is one, so a task can be resumed by
//! name alone.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use glob::glob;
use std::path::{Path, PathBuf};

use crate::history::HISTORY_FILE;
use crate::signals::SIGNAL_FILE;
use crate::state::OVERVIEW_FILE;

pub const SESSION_LOG_FILE: &str = "session.log";

/// Lower-case and dash-separate a user supplied session identifier.
pub fn normalize_name(id: &str) -> String {
    id.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// Strip a leading `YY-MM-DD-` date from a session directory name.
pub fn strip_date_prefix(name: &str) -> &str {
    let mut parts = name.splitn(4, '-');
    let date: Vec<&str> = parts.by_ref().take(3).collect();
    let is_date = date.len() == 3
        && date
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_digit()));
    match parts.next() {
        Some(rest) if is_date && !rest.is_empty() => rest,
        _ => name,
    }
}

/// Paths of everything inside one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub dir: PathBuf,
    /// Directory name, e.g. `26-10-16-add-auth`.
    pub name: String,
}

impl SessionPaths {
    pub fn new(dir: PathBuf) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { dir, name }
    }

    pub fn overview(&self) -> PathBuf {
        self.dir.join(OVERVIEW_FILE)
    }

    pub fn signal(&self) -> PathBuf {
        self.dir.join(SIGNAL_FILE)
    }

    pub fn history(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn session_log(&self) -> PathBuf {
        self.dir.join(SESSION_LOG_FILE)
    }

    /// Per-invocation agent output log: `<MM-DD-HHMMSS>-<phase>-a<attempt>.jsonl`.
    pub fn invocation_log(&self, at: DateTime<Local>, phase: &str, attempt: u32) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-a{}.jsonl",
            at.format("%m-%d-%H%M%S"),
            phase,
            attempt
        ))
    }

    /// Session name without its date prefix, used for branch names.
    pub fn short_name(&self) -> &str {
        strip_date_prefix(&self.name)
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Resolve an identifier to a session directory without creating it.
///
/// Order: exact directory name, then the lexicographically last
/// `*-<name>` match (the newest date), then a new `YY-MM-DD-<name>`.
pub fn resolve(sessions_root: &Path, id: &str, today: DateTime<Local>) -> Result<SessionPaths> {
    let name = normalize_name(id);
    anyhow::ensure!(!name.is_empty(), "Session identifier must not be empty");
    anyhow::ensure!(
        !name.contains('/') && !name.contains(".."),
        "Session identifier '{}' must not contain path separators",
        id
    );

    let exact = sessions_root.join(&name);
    if exact.is_dir() {
        return Ok(SessionPaths::new(exact));
    }

    let pattern = sessions_root.join(format!("*-{}", escape_glob(&name)));
    let pattern = pattern.to_string_lossy();
    let mut matches: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("Invalid session pattern {}", pattern))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_dir())
        .filter(|p| {
            p.file_name()
                .map(|n| strip_date_prefix(&n.to_string_lossy()) == name)
                .unwrap_or(false)
        })
        .collect();
    matches.sort();

    if let Some(latest) = matches.pop() {
        return Ok(SessionPaths::new(latest));
    }

    Ok(SessionPaths::new(sessions_root.join(format!(
        "{}-{}",
        today.format("%y-%m-%d"),
        name
    ))))
}

fn escape_glob(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '*' | '?' | '[' | ']' => format!("[{}]", c),
            c => c.to_string(),
        })
        .collect()
}

/// Resolve and create the session directory.
pub fn open(sessions_root: &Path, id: &str) -> Result<SessionPaths> {
    let paths = resolve(sessions_root, id, Local::now())?;
    std::fs::create_dir_all(&paths.dir)
        .with_context(|| format!("Failed to create session directory {}", paths.dir.display()))?;
    Ok(paths)
}
