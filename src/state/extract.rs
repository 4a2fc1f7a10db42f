//! Tolerant extraction of structured state from `_overview.md`.
//!
//! The overview is written by the agent in loose markdown. Only `Phase` is
//! mandatory; everything else falls back to a default:
//!
//! ```text
//! # Session: add-auth
//!
//! ## Status
//! **Phase:** implementation
//! Iteration: 3
//! Blocked: no
//! Working Dir: ~/work/add-auth
//! Last Action: wrote migration
//! Next: run tests
//!
//! ## Flow Log
//! - 01-15 14:30 [investigation] mapped the auth module
//! - 01-15 15:02 [implementation] started migration
//! ```

use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::config::expand_home;
use crate::errors::ParseError;

/// Number of activity log entries inspected when recovering a lost phase.
pub const RECOVERY_WINDOW: usize = 20;

/// Marks activity-log entries written by the orchestrator itself.
pub const NOTE_TAG: &str = "[shepherd]";

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*+]\s+|\d+[.)]\s+)").unwrap());

/// Everything the orchestrator reads out of the overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredState {
    pub phase: String,
    pub iteration: u32,
    pub halted: bool,
    pub working_dir: Option<PathBuf>,
    pub last_action: Option<String>,
    pub next: Option<String>,
    pub activity_log: Vec<String>,
}

impl StructuredState {
    /// State of a session whose overview does not exist yet.
    pub fn fresh(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            iteration: 1,
            halted: false,
            working_dir: None,
            last_action: None,
            next: None,
            activity_log: Vec::new(),
        }
    }
}

/// Line-level split of the document into key/value fields and log entries.
#[derive(Debug, Default)]
struct ParsedDocument {
    fields: Vec<(String, String)>,
    activity: Vec<String>,
}

impl ParsedDocument {
    fn field(&self, keys: &[&str]) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| keys.contains(&k.as_str()))
            .map(|(_, v)| v.as_str())
    }
}

fn is_log_heading(heading: &str) -> bool {
    let heading = heading.to_ascii_lowercase();
    heading.contains("flow log") || heading.contains("activity") || heading.ends_with("log")
}

fn strip_emphasis(s: &str) -> String {
    s.replace("**", "").replace("__", "")
}

fn parse_document(raw: &str) -> ParsedDocument {
    let mut doc = ParsedDocument::default();
    let mut in_log = false;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(heading) = trimmed.strip_prefix('#') {
            in_log = is_log_heading(heading.trim_start_matches('#').trim());
            continue;
        }

        let body = LIST_MARKER.replace(trimmed, "");

        if in_log {
            let entry = body.trim();
            if !entry.is_empty() {
                doc.activity.push(entry.to_string());
            }
            continue;
        }

        let body = strip_emphasis(&body);
        if let Some((key, value)) = body.split_once(':') {
            let key = key.trim().to_ascii_lowercase();
            if key.is_empty() || key.contains(char::is_numeric) {
                continue;
            }
            doc.fields.push((key, value.trim().to_string()));
        }
    }

    doc
}

/// Reduce a phase value such as "`Implementation` (step 2)" to "implementation".
fn normalize_phase(value: &str) -> Option<String> {
    let token = value.split_whitespace().next()?;
    let token = token.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-');
    (!token.is_empty()).then(|| token.to_ascii_lowercase())
}

fn parse_iteration(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok().filter(|n| *n > 0)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "y" | "1" | "blocked" | "halted"
    )
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "-" && !v.eq_ignore_ascii_case("none"))
        .map(str::to_string)
}

/// Extract structured state from raw overview text.
///
/// Pure: identical content, modulo whitespace and section order, yields an
/// identical result.
pub fn extract(raw: &str) -> Result<StructuredState, ParseError> {
    let doc = parse_document(raw);

    let phase_value = doc
        .field(&["phase"])
        .ok_or(ParseError::MissingField("Phase"))?;
    let phase = normalize_phase(phase_value).ok_or(ParseError::EmptyField { field: "Phase" })?;

    Ok(StructuredState {
        phase,
        iteration: doc
            .field(&["iteration", "iterations"])
            .and_then(parse_iteration)
            .unwrap_or(1),
        halted: doc
            .field(&["blocked", "halted"])
            .map(parse_flag)
            .unwrap_or(false),
        working_dir: optional_text(doc.field(&["working dir", "working directory"]))
            .map(|p| expand_home(p.trim_matches('`'))),
        last_action: optional_text(doc.field(&["last action"])),
        next: optional_text(doc.field(&["next", "next step"])),
        activity_log: doc.activity,
    })
}

/// Rebuild state from the tail of the activity log when the `Phase` field is
/// lost.
///
/// Walks the last [`RECOVERY_WINDOW`] entries newest-first and takes the last
/// registered phase name mentioned in the newest entry that mentions one.
/// Entries tagged [`NOTE_TAG`] are the orchestrator's own notes, not a record
/// of where the agent was, and are skipped. Returns `None` rather than
/// guessing when nothing matches.
pub fn recover_from_log(raw: &str, known_phases: &[&str]) -> Option<StructuredState> {
    let doc = parse_document(raw);

    let phase = doc
        .activity
        .iter()
        .rev()
        .take(RECOVERY_WINDOW)
        .filter(|entry| !entry.contains(NOTE_TAG))
        .find_map(|entry| last_phase_mention(entry, known_phases))?;

    let mut state = StructuredState::fresh(&phase);
    state.activity_log = doc.activity;
    Some(state)
}

fn last_phase_mention(entry: &str, known_phases: &[&str]) -> Option<String> {
    entry
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .filter(|word| !word.is_empty())
        .filter_map(|word| {
            known_phases
                .iter()
                .find(|p| p.eq_ignore_ascii_case(word))
                .map(|p| p.to_string())
        })
        .last()
}
