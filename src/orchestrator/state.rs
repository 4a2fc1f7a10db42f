use serde::Serialize;
use std::fmt;
use std::process::ExitCode;

use crate::signals::WaitingFor;

/// Control state of the orchestrator after an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControlState {
    Running,
    WaitingForHuman {
        phase: String,
        waiting_for: WaitingFor,
    },
    Blocked {
        phase: String,
        reason: String,
    },
    Done {
        phase: String,
        summary: String,
    },
}

impl ControlState {
    pub fn is_halted(&self) -> bool {
        !matches!(self, ControlState::Running)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlState::Running => "running",
            ControlState::WaitingForHuman { .. } => "waiting",
            ControlState::Blocked { .. } => "blocked",
            ControlState::Done { .. } => "done",
        }
    }

    /// Process exit code for a halted run: 0 done, 2 blocked, 3 waiting.
    pub fn exit_code(&self) -> u8 {
        match self {
            ControlState::Done { .. } => 0,
            ControlState::Blocked { .. } | ControlState::Running => 2,
            ControlState::WaitingForHuman { .. } => 3,
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlState::Running => write!(f, "running"),
            ControlState::WaitingForHuman { phase, waiting_for } => {
                write!(f, "waiting in {} for {}", phase, waiting_for)
            }
            ControlState::Blocked { phase, reason } => write!(f, "blocked in {}: {}", phase, reason),
            ControlState::Done { phase, summary } => write!(f, "done in {}: {}", phase, summary),
        }
    }
}

/// Result of driving a session until it halts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub state: ControlState,
    /// Iterations started by this process.
    pub iterations: u64,
}

impl Outcome {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.state.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let done = ControlState::Done {
            phase: "done".into(),
            summary: "ok".into(),
        };
        let blocked = ControlState::Blocked {
            phase: "testing".into(),
            reason: "x".into(),
        };
        let waiting = ControlState::WaitingForHuman {
            phase: "planning".into(),
            waiting_for: WaitingFor::PlanApproval,
        };
        assert_eq!(done.exit_code(), 0);
        assert_eq!(blocked.exit_code(), 2);
        assert_eq!(waiting.exit_code(), 3);
        assert!(done.is_halted() && blocked.is_halted() && waiting.is_halted());
        assert!(!ControlState::Running.is_halted());
    }

    #[test]
    fn test_display_and_serialize() {
        let blocked = ControlState::Blocked {
            phase: "testing".into(),
            reason: "illegal phase transition".into(),
        };
        assert_eq!(
            blocked.to_string(),
            "blocked in testing: illegal phase transition"
        );
        let json = serde_json::to_value(&blocked).unwrap();
        assert_eq!(json["state"], "blocked");
        assert_eq!(json["phase"], "testing");
    }
}
