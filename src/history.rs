//! Append-only audit trail of every signal the orchestrator has read.
//!
//! One JSON object per line in `_signal_history.jsonl`. Appending is
//! best-effort: a failure to record history is logged and never interrupts
//! the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const HISTORY_FILE: &str = "_signal_history.jsonl";

/// Outcome of evaluating one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Invalid,
    IllegalTransition,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accepted => write!(f, "accepted"),
            Verdict::Invalid => write!(f, "invalid"),
            Verdict::IllegalTransition => write!(f, "illegal_transition"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalHistoryRecord {
    /// In-process iteration counter. Every attempt of one iteration shares
    /// it, so `(run_id, iteration, attempt)` identifies a record.
    pub iteration: u64,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub attempt: u32,
    /// Phase the session was in when the agent ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_phase: Option<String>,
    /// Phase the signal claims.
    pub phase: String,
    /// The signal payload exactly as the agent wrote it.
    pub signal: serde_json::Value,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct SignalHistory {
    path: PathBuf,
}

impl SignalHistory {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            path: session_dir.join(HISTORY_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record. Errors are logged, never returned.
    pub fn append(&self, record: &SignalHistoryRecord) {
        if let Err(e) = self.try_append(record) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to append signal history"
            );
        }
    }

    fn try_append(&self, record: &SignalHistoryRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()
    }

    /// All records in file order. Malformed lines are skipped.
    pub fn read_all(&self) -> std::io::Result<Vec<SignalHistoryRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::debug!(line = idx + 1, error = %e, "Skipping malformed history line"),
            }
        }
        Ok(records)
    }

    /// Accepted iterations that ran in `phase`, across every run of the
    /// session. An unreadable history counts as empty.
    pub fn phase_iterations(&self, phase: &str) -> usize {
        match self.read_all() {
            Ok(records) => records.iter().filter(|r| r.ran_in(phase)).count(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read signal history, phase budget not enforced"
                );
                0
            }
        }
    }
}

impl SignalHistoryRecord {
    fn ran_in(&self, phase: &str) -> bool {
        self.verdict == Verdict::Accepted
            && self
                .from_phase
                .as_deref()
                .unwrap_or(self.phase.as_str())
                .eq_ignore_ascii_case(phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(iteration: u64, verdict: Verdict) -> SignalHistoryRecord {
        SignalHistoryRecord {
            iteration,
            timestamp: Utc::now(),
            run_id: Uuid::new_v4(),
            attempt: 1,
            from_phase: Some("testing".into()),
            phase: "testing".into(),
            signal: json!({"status": "continue", "phase": "testing"}),
            verdict,
            detail: None,
        }
    }

    #[test]
    fn test_append_and_read_all_in_order() {
        let dir = tempdir().unwrap();
        let history = SignalHistory::new(dir.path());
        history.append(&record(1, Verdict::Accepted));
        history.append(&record(2, Verdict::Invalid));
        history.append(&record(3, Verdict::IllegalTransition));

        let records = history.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.iteration).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(records[2].verdict, Verdict::IllegalTransition);
    }

    #[test]
    fn test_record_serialization_shape() {
        let line = serde_json::to_value(record(7, Verdict::IllegalTransition)).unwrap();
        assert_eq!(line["verdict"], "illegal_transition");
        assert_eq!(line["signal"]["status"], "continue");
        assert!(line.get("detail").is_none());
        assert!(line["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_read_all_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let history = SignalHistory::new(dir.path());
        assert!(history.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_read_all_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let history = SignalHistory::new(dir.path());
        history.append(&record(1, Verdict::Accepted));
        let mut file = OpenOptions::new().append(true).open(history.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        history.append(&record(2, Verdict::Accepted));

        assert_eq!(history.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_append_failure_does_not_panic() {
        let dir = tempdir().unwrap();
        let history = SignalHistory::new(&dir.path().join("missing").join("deeper"));
        history.append(&record(1, Verdict::Accepted));
        assert!(!history.path().exists());
    }

    #[test]
    fn test_phase_iterations_counts_accepted_runs_in_phase() {
        let dir = tempdir().unwrap();
        let history = SignalHistory::new(dir.path());
        history.append(&record(1, Verdict::Accepted));
        history.append(&record(2, Verdict::Invalid));
        history.append(&SignalHistoryRecord {
            phase: "quality".into(),
            ..record(3, Verdict::Accepted)
        });
        history.append(&SignalHistoryRecord {
            from_phase: Some("quality".into()),
            ..record(4, Verdict::Accepted)
        });
        history.append(&SignalHistoryRecord {
            from_phase: None,
            ..record(5, Verdict::Accepted)
        });

        assert_eq!(history.phase_iterations("Testing"), 3);
        assert_eq!(history.phase_iterations("quality"), 1);
        assert_eq!(history.phase_iterations("done"), 0);
    }
}
