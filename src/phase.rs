//! Phase registry for supervised sessions.
//!
//! This module provides:
//! - `PhaseDefinition` describing a single phase: its agent, successors, the
//!   signals it may report and how many iterations it may spend
//! - `PhaseRegistry`, the fixed transition graph every signal is checked against
//! - The standard eight-phase table used by `shepherd run`
//!
//! The registry is built once at startup and never mutated. There is no
//! runtime registration, so every iteration of every run is validated against
//! the same graph.

use serde::Serialize;
use std::fmt;

use crate::errors::{RegistryError, UnknownPhaseError};
use crate::signals::SignalStatus;

const ALL_STATUSES: [SignalStatus; 4] = [
    SignalStatus::Continue,
    SignalStatus::Done,
    SignalStatus::Blocked,
    SignalStatus::Waiting,
];

/// A single phase of a supervised task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseDefinition {
    /// Phase name as written in the overview document (e.g. "planning")
    pub name: String,
    /// Identifier of the agent responsible for this phase
    pub agent: String,
    /// Names of phases the task may move to from here
    pub successors: Vec<String>,
    /// Leaving this phase requires a human to approve first
    pub is_gate: bool,
    /// Statuses an agent running this phase may report
    pub allowed_signals: Vec<SignalStatus>,
    /// Accepted iterations allowed in this phase over the whole session,
    /// counted from signal history so the budget survives restarts
    pub max_iterations: Option<u32>,
}

impl PhaseDefinition {
    pub fn new(name: &str, agent: &str, successors: &[&str], is_gate: bool) -> Self {
        Self {
            name: name.to_string(),
            agent: agent.to_string(),
            successors: successors.iter().map(|s| s.to_string()).collect(),
            is_gate,
            allowed_signals: ALL_STATUSES.to_vec(),
            max_iterations: None,
        }
    }

    pub fn with_signals(mut self, signals: &[SignalStatus]) -> Self {
        self.allowed_signals = signals.to_vec();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn accepts(&self, status: SignalStatus) -> bool {
        self.allowed_signals.contains(&status)
    }

    pub fn allowed_signal_names(&self) -> String {
        self.allowed_signals
            .iter()
            .map(SignalStatus::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// A phase with no successors ends the task.
    pub fn is_terminal(&self) -> bool {
        self.successors.is_empty()
    }

    pub fn has_successor(&self, name: &str) -> bool {
        self.successors.iter().any(|s| s.eq_ignore_ascii_case(name))
    }
}

/// Why a claimed phase transition was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
    pub status: SignalStatus,
    pub detail: String,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} on '{}': {}",
            self.from, self.to, self.status, self.detail
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// Fixed table of phases and their legal successors.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: Vec<PhaseDefinition>,
}

impl PhaseRegistry {
    /// Build a registry from an explicit table.
    ///
    /// The first phase is the initial phase of a new session. Names must be
    /// unique, every successor must be registered, every phase must accept at
    /// least one signal, and at least one phase must be terminal.
    pub fn new(phases: Vec<PhaseDefinition>) -> Result<Self, RegistryError> {
        if phases.is_empty() {
            return Err(RegistryError::Empty);
        }

        for (i, phase) in phases.iter().enumerate() {
            if phases[..i]
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&phase.name))
            {
                return Err(RegistryError::Duplicate {
                    phase: phase.name.clone(),
                });
            }
            if let Some(successor) = phase
                .successors
                .iter()
                .find(|s| !phases.iter().any(|p| p.name.eq_ignore_ascii_case(s)))
            {
                return Err(RegistryError::UnknownSuccessor {
                    phase: phase.name.clone(),
                    successor: successor.clone(),
                });
            }
            if phase.allowed_signals.is_empty() {
                return Err(RegistryError::NoSignals {
                    phase: phase.name.clone(),
                });
            }
            if phase.max_iterations == Some(0) {
                return Err(RegistryError::ZeroIterationLimit {
                    phase: phase.name.clone(),
                });
            }
        }

        if !phases.iter().any(PhaseDefinition::is_terminal) {
            return Err(RegistryError::NoTerminal);
        }

        Ok(Self { phases })
    }

    /// The standard workflow: init through done, with human gates on
    /// requirements and planning and a testing/quality loop. Only the gates
    /// and implementation may wait for a human; only `done` may finish.
    pub fn standard() -> Self {
        use SignalStatus::{Blocked, Continue, Done, Waiting};

        let phases = vec![
            PhaseDefinition::new("init", "init-agent", &["investigation"], false)
                .with_signals(&[Continue, Blocked])
                .with_max_iterations(5),
            PhaseDefinition::new(
                "investigation",
                "investigation-agent",
                &["requirements"],
                false,
            )
            .with_signals(&[Continue, Blocked])
            .with_max_iterations(20),
            PhaseDefinition::new("requirements", "requirements-agent", &["planning"], true)
                .with_signals(&[Continue, Waiting, Blocked])
                .with_max_iterations(10),
            PhaseDefinition::new("planning", "planning-agent", &["implementation"], true)
                .with_signals(&[Continue, Waiting, Blocked])
                .with_max_iterations(10),
            PhaseDefinition::new(
                "implementation",
                "implementation-agent",
                &["testing"],
                false,
            )
            .with_signals(&[Continue, Waiting, Blocked])
            .with_max_iterations(100),
            PhaseDefinition::new("testing", "testing-agent", &["quality", "done"], false)
                .with_signals(&[Continue, Blocked])
                .with_max_iterations(20),
            PhaseDefinition::new("quality", "quality-agent", &["testing"], false)
                .with_signals(&[Continue, Blocked])
                .with_max_iterations(10),
            PhaseDefinition::new("done", "done-agent", &[], false)
                .with_signals(&[Done, Blocked])
                .with_max_iterations(3),
        ];
        Self { phases }
    }

    pub fn lookup(&self, name: &str) -> Result<&PhaseDefinition, UnknownPhaseError> {
        let name = name.trim();
        self.phases
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| UnknownPhaseError {
                phase: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Unknown phases are never gates.
    pub fn is_gate(&self, name: &str) -> bool {
        self.lookup(name).map(|p| p.is_gate).unwrap_or(false)
    }

    /// Phase a brand-new session starts in.
    pub fn initial(&self) -> &PhaseDefinition {
        &self.phases[0]
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseDefinition> {
        self.phases.iter()
    }

    pub fn is_legal_transition(&self, current: &str, claimed: &str, status: SignalStatus) -> bool {
        self.check_transition(current, claimed, status).is_ok()
    }

    /// Validate the phase an agent claims to have acted in against the phase
    /// the session was in when it was invoked.
    ///
    /// The status must first be one the current phase accepts. Then:
    /// - `continue`: same phase, or a declared successor. Gate phases cannot
    ///   be left on `continue`.
    /// - `done`: only from a terminal phase, staying in it.
    /// - `waiting` / `blocked`: same phase or a declared successor. These halt
    ///   the loop and never advance the phase.
    pub fn check_transition(
        &self,
        current: &str,
        claimed: &str,
        status: SignalStatus,
    ) -> Result<(), IllegalTransition> {
        let reject = |detail: String| IllegalTransition {
            from: current.to_string(),
            to: claimed.to_string(),
            status,
            detail,
        };

        let from = self
            .lookup(current)
            .map_err(|e| reject(format!("source {}", e)))?;
        let to = self
            .lookup(claimed)
            .map_err(|e| reject(format!("target {}", e)))?;

        if !from.accepts(status) {
            return Err(reject(format!(
                "'{}' does not accept '{}' signals (allowed: {})",
                from.name,
                status,
                from.allowed_signal_names()
            )));
        }

        let same = from.name == to.name;
        let successor = from.has_successor(&to.name);

        match status {
            SignalStatus::Continue => {
                if same {
                    Ok(())
                } else if !successor {
                    Err(reject(format!(
                        "not a successor (valid targets: {})",
                        from.successors.join(", ")
                    )))
                } else if from.is_gate {
                    Err(reject(format!(
                        "'{}' is a gate and requires human approval before moving on",
                        from.name
                    )))
                } else {
                    Ok(())
                }
            }
            SignalStatus::Done => {
                if !from.is_terminal() {
                    Err(reject(format!("'{}' is not a terminal phase", from.name)))
                } else if !same {
                    Err(reject("done must be signalled from the terminal phase itself".into()))
                } else {
                    Ok(())
                }
            }
            SignalStatus::Waiting | SignalStatus::Blocked => {
                if same || successor {
                    Ok(())
                } else {
                    Err(reject(format!(
                        "not the current phase or a successor (valid targets: {})",
                        from.successors.join(", ")
                    )))
                }
            }
        }
    }
}

impl Default for PhaseRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
