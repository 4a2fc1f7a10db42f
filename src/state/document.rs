use chrono::Local;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::extract::{NOTE_TAG, StructuredState, extract, recover_from_log};
use crate::errors::{OrchestratorError, ParseError};

pub const OVERVIEW_FILE: &str = "_overview.md";

/// How the structured state was obtained from the overview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSource {
    /// No overview yet: a brand new session.
    Fresh,
    Parsed,
    /// `Phase` was unreadable and the activity log supplied it.
    Recovered(ParseError),
}

/// The agent-owned `_overview.md` document.
///
/// The orchestrator only ever reads it, apart from appending notes to the
/// activity log when it halts a session.
pub struct SessionDocument {
    path: PathBuf,
}

impl SessionDocument {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            path: session_dir.join(OVERVIEW_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Raw document text, or `None` when the overview does not exist.
    pub fn read(&self) -> Result<Option<String>, OrchestratorError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(OrchestratorError::OverviewRead {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Load the structured state, falling back to the activity log when the
    /// phase field is unreadable.
    ///
    /// The inner `Err` carries the parse failure when recovery also fails.
    pub fn load(
        &self,
        initial_phase: &str,
        known_phases: &[&str],
    ) -> Result<Result<(StructuredState, StateSource), ParseError>, OrchestratorError> {
        let Some(raw) = self.read()? else {
            return Ok(Ok((StructuredState::fresh(initial_phase), StateSource::Fresh)));
        };

        Ok(match extract(&raw) {
            Ok(state) => Ok((state, StateSource::Parsed)),
            Err(err) => match recover_from_log(&raw, known_phases) {
                Some(state) => Ok((state, StateSource::Recovered(err))),
                None => Err(err),
            },
        })
    }

    /// Append a timestamped note to the activity log section.
    ///
    /// Creates the section when the document has none, and a minimal document
    /// carrying `phase` when the overview does not exist.
    pub fn append_note(&self, phase: &str, note: &str) -> std::io::Result<()> {
        let entry = format!(
            "- {} {} {}",
            Local::now().format("%m-%d %H:%M"),
            NOTE_TAG,
            note.replace('\n', " ")
        );

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => insert_log_entry(&content, &entry),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                format!("# Session\n\nPhase: {}\n\n## Flow Log\n{}\n", phase, entry)
            }
            Err(e) => return Err(e),
        };

        fs::write(&self.path, content)
    }
}

fn is_heading(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn is_log_heading(line: &str) -> bool {
    let heading = line.trim().trim_start_matches('#').trim().to_ascii_lowercase();
    heading.contains("flow log") || heading.contains("activity") || heading.ends_with("log")
}

/// Insert `entry` as the last line of the first activity log section, or add
/// a new section at the end of the document.
fn insert_log_entry(content: &str, entry: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();

    let Some(start) = lines.iter().position(|l| is_heading(l) && is_log_heading(l)) else {
        let mut out = content.trim_end().to_string();
        out.push_str("\n\n## Flow Log\n");
        out.push_str(entry);
        out.push('\n');
        return out;
    };

    let end = lines[start + 1..]
        .iter()
        .position(|l| is_heading(l))
        .map(|offset| start + 1 + offset)
        .unwrap_or(lines.len());

    // Insert after the last non-blank line of the section.
    let insert_at = (start + 1..end)
        .rev()
        .find(|&i| !lines[i].trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(start + 1);

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..insert_at]);
    out.push(entry);
    out.extend_from_slice(&lines[insert_at..]);

    let mut joined = out.join("\n");
    joined.push('\n');
    joined
}
