//! Signal types for orchestrator flow control.
//!
//! The agent writes one JSON object per iteration. It is first decoded into a
//! permissive [`RawSignal`] (every field optional) and then validated into the
//! typed [`Signal`] sum, so an accepted signal always carries the fields its
//! status requires.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four statuses an agent may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Continue,
    Done,
    Blocked,
    Waiting,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Continue => "continue",
            SignalStatus::Done => "done",
            SignalStatus::Blocked => "blocked",
            SignalStatus::Waiting => "waiting",
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(SignalStatus::Continue),
            "done" => Ok(SignalStatus::Done),
            "blocked" => Ok(SignalStatus::Blocked),
            "waiting" => Ok(SignalStatus::Waiting),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// What a blocked agent needs before it can proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedNeed {
    HumanDecision,
    Clarification,
    ErrorResolution,
}

impl BlockedNeed {
    pub const ALL: [BlockedNeed; 3] = [
        BlockedNeed::HumanDecision,
        BlockedNeed::Clarification,
        BlockedNeed::ErrorResolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedNeed::HumanDecision => "human_decision",
            BlockedNeed::Clarification => "clarification",
            BlockedNeed::ErrorResolution => "error_resolution",
        }
    }
}

impl fmt::Display for BlockedNeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockedNeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == s.trim())
            .ok_or_else(|| format!("'needs' must be one of {}", join_all(&Self::ALL)))
    }
}

/// What a waiting agent is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingFor {
    QaAnswers,
    PlanApproval,
    FileUpdate,
    HumanAction,
}

impl WaitingFor {
    pub const ALL: [WaitingFor; 4] = [
        WaitingFor::QaAnswers,
        WaitingFor::PlanApproval,
        WaitingFor::FileUpdate,
        WaitingFor::HumanAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WaitingFor::QaAnswers => "qa_answers",
            WaitingFor::PlanApproval => "plan_approval",
            WaitingFor::FileUpdate => "file_update",
            WaitingFor::HumanAction => "human_action",
        }
    }
}

impl fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitingFor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|w| w.as_str() == s.trim())
            .ok_or_else(|| format!("'for' must be one of {}", join_all(&Self::ALL)))
    }
}

fn join_all<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The signal file exactly as the agent wrote it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs: Option<String>,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<String>,
}

impl RawSignal {
    /// True when every field the status requires is present and enumerated
    /// fields hold an allowed value.
    pub fn validate(&self) -> bool {
        Signal::try_from(self.clone()).is_ok()
    }

    /// Phase named by the signal, if any, ignoring blank values.
    pub fn claimed_phase(&self) -> Option<&str> {
        non_empty(&self.phase)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: &Option<String>, field: &str, status: SignalStatus) -> Result<String, String> {
    non_empty(value)
        .map(str::to_string)
        .ok_or_else(|| format!("'{}' is required for status '{}'", field, status))
}

/// A validated control signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Continue {
        phase: String,
    },
    Done {
        phase: String,
        summary: String,
    },
    Blocked {
        phase: String,
        reason: String,
        needs: BlockedNeed,
    },
    Waiting {
        phase: String,
        waiting_for: WaitingFor,
    },
}

impl Signal {
    pub fn status(&self) -> SignalStatus {
        match self {
            Signal::Continue { .. } => SignalStatus::Continue,
            Signal::Done { .. } => SignalStatus::Done,
            Signal::Blocked { .. } => SignalStatus::Blocked,
            Signal::Waiting { .. } => SignalStatus::Waiting,
        }
    }

    /// The phase the agent believes it just acted in.
    pub fn phase(&self) -> &str {
        match self {
            Signal::Continue { phase }
            | Signal::Done { phase, .. }
            | Signal::Blocked { phase, .. }
            | Signal::Waiting { phase, .. } => phase,
        }
    }
}

impl TryFrom<RawSignal> for Signal {
    type Error = String;

    fn try_from(raw: RawSignal) -> Result<Self, Self::Error> {
        let status_str = non_empty(&raw.status).ok_or("'status' is missing")?;
        let status: SignalStatus = status_str.parse()?;
        let phase = required(&raw.phase, "phase", status)?.to_ascii_lowercase();

        match status {
            SignalStatus::Continue => Ok(Signal::Continue { phase }),
            SignalStatus::Done => Ok(Signal::Done {
                phase,
                summary: required(&raw.summary, "summary", status)?,
            }),
            SignalStatus::Blocked => Ok(Signal::Blocked {
                phase,
                reason: required(&raw.reason, "reason", status)?,
                needs: required(&raw.needs, "needs", status)?.parse()?,
            }),
            SignalStatus::Waiting => Ok(Signal::Waiting {
                phase,
                waiting_for: required(&raw.waiting_for, "for", status)?.parse()?,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawSignal {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_continue_requires_phase_only() {
        let signal = Signal::try_from(raw(r#"{"status":"continue","phase":"implementation"}"#));
        assert_eq!(
            signal.unwrap(),
            Signal::Continue {
                phase: "implementation".into()
            }
        );
        assert!(!raw(r#"{"status":"continue"}"#).validate());
    }

    #[test]
    fn test_done_requires_summary() {
        let err = Signal::try_from(raw(r#"{"status":"done","phase":"done"}"#)).unwrap_err();
        assert!(err.contains("'summary' is required"));

        let ok = raw(r#"{"status":"done","phase":"done","summary":"shipped"}"#);
        assert!(ok.validate());
    }

    #[test]
    fn test_blocked_requires_reason_and_known_need() {
        assert!(
            raw(r#"{"status":"blocked","phase":"testing","reason":"db down","needs":"error_resolution"}"#)
                .validate()
        );
        assert!(!raw(r#"{"status":"blocked","phase":"testing","needs":"clarification"}"#).validate());
        assert!(!raw(r#"{"status":"blocked","phase":"testing","reason":"x"}"#).validate());

        let err = Signal::try_from(raw(
            r#"{"status":"blocked","phase":"testing","reason":"x","needs":"coffee"}"#,
        ))
        .unwrap_err();
        assert!(err.contains("human_decision, clarification, error_resolution"));
    }

    #[test]
    fn test_waiting_requires_known_for() {
        let signal =
            Signal::try_from(raw(r#"{"status":"waiting","phase":"requirements","for":"qa_answers"}"#))
                .unwrap();
        assert_eq!(signal.status(), SignalStatus::Waiting);
        assert_eq!(signal.phase(), "requirements");

        assert!(!raw(r#"{"status":"waiting","phase":"requirements"}"#).validate());
        assert!(!raw(r#"{"status":"waiting","phase":"requirements","for":"lunch"}"#).validate());
    }

    #[test]
    fn test_unknown_status_is_invalid() {
        let err = Signal::try_from(raw(r#"{"status":"paused","phase":"init"}"#)).unwrap_err();
        assert!(err.contains("unknown status"));
        assert!(!raw(r#"{"phase":"init"}"#).validate());
    }

    #[test]
    fn test_status_case_and_phase_case_are_normalised() {
        let signal = Signal::try_from(raw(r#"{"status":"CONTINUE","phase":"Testing"}"#)).unwrap();
        assert_eq!(signal.phase(), "testing");
    }

    #[test]
    fn test_blank_fields_count_as_missing() {
        assert!(!raw(r#"{"status":"done","phase":"done","summary":"   "}"#).validate());
        assert!(!raw(r#"{"status":"continue","phase":""}"#).validate());
    }

    #[test]
    fn test_validate_iff_required_fields_present() {
        let needs = ["human_decision", "clarification", "error_resolution", "bogus"];
        let fors = ["qa_answers", "plan_approval", "file_update", "human_action", "bogus"];

        for status in ["continue", "done", "blocked", "waiting", "other"] {
            for has_summary in [false, true] {
                for has_reason in [false, true] {
                    for need in needs.iter().map(Some).chain([None]) {
                        for wait in fors.iter().map(Some).chain([None]) {
                            let signal = RawSignal {
                                status: Some(status.into()),
                                phase: Some("init".into()),
                                summary: has_summary.then(|| "s".into()),
                                reason: has_reason.then(|| "r".into()),
                                needs: need.map(|n| n.to_string()),
                                waiting_for: wait.map(|w| w.to_string()),
                            };
                            let expected = match status {
                                "continue" => true,
                                "done" => has_summary,
                                "blocked" => {
                                    has_reason && need.is_some_and(|n| *n != "bogus")
                                }
                                "waiting" => wait.is_some_and(|w| *w != "bogus"),
                                _ => false,
                            };
                            assert_eq!(signal.validate(), expected, "{:?}", signal);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_raw_signal_serializes_for_key() {
        let signal = RawSignal {
            status: Some("waiting".into()),
            phase: Some("planning".into()),
            waiting_for: Some("plan_approval".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["for"], "plan_approval");
        assert!(json.get("summary").is_none());
    }
}
