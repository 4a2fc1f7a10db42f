use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::state::{ControlState, Outcome};
use crate::config::{RuntimeConfig, TaskConfig};
use crate::errors::{OrchestratorError, SignalError};
use crate::history::{SignalHistory, SignalHistoryRecord, Verdict};
use crate::notify::{NotificationEvent, Notifier, fire};
use crate::phase::PhaseRegistry;
use crate::retry::RetryPolicy;
use crate::runner::{AgentRunner, ContextBuilder, InvocationContext};
use crate::session::SessionPaths;
use crate::signals::{Signal, SignalRead, SignalStore};
use crate::state::{SessionDocument, StateSource, StructuredState};

/// Phase reported when the overview is too damaged to name one.
const UNKNOWN_PHASE: &str = "unknown";

/// Knobs for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub stall_limit: u32,
    /// Stop after this many iterations in one process.
    pub max_iterations: Option<u64>,
    pub branch_prefix: Option<String>,
    /// Task description for a brand new session.
    pub initial_task: Option<String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            timeout: config.timeout,
            retry: config.retry,
            stall_limit: config.stall_limit,
            max_iterations: None,
            branch_prefix: config.branch_prefix.clone(),
            initial_task: None,
        }
    }
}

/// What an iteration's attempts produced.
enum AttemptsOutcome {
    Accepted(Signal),
    Illegal(String),
    Exhausted { attempts: u32, last_error: String },
}

/// Drives one session through its phases.
pub struct Orchestrator {
    registry: PhaseRegistry,
    runner: Arc<dyn AgentRunner>,
    notifier: Arc<dyn Notifier>,
    session: SessionPaths,
    task: TaskConfig,
    settings: OrchestratorSettings,
    document: SessionDocument,
    store: SignalStore,
    history: SignalHistory,
    run_id: Uuid,
    iterations: u64,
    /// Phase of the previous iteration and how many times in a row it ran.
    streak: Option<(String, u32)>,
}

impl Orchestrator {
    pub fn new(
        registry: PhaseRegistry,
        runner: Arc<dyn AgentRunner>,
        notifier: Arc<dyn Notifier>,
        session: SessionPaths,
        task: TaskConfig,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            document: SessionDocument::new(&session.dir),
            store: SignalStore::new(&session.dir),
            history: SignalHistory::new(&session.dir),
            registry,
            runner,
            notifier,
            session,
            task,
            settings,
            run_id: Uuid::new_v4(),
            iterations: 0,
            streak: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Iterate until the session halts.
    pub async fn run(&mut self) -> Result<Outcome, OrchestratorError> {
        std::fs::create_dir_all(&self.session.dir).map_err(|source| {
            OrchestratorError::SessionDir {
                path: self.session.dir.clone(),
                source,
            }
        })?;

        tracing::info!(
            session = %self.session.name,
            run_id = %self.run_id,
            "Starting orchestrator"
        );

        loop {
            let state = self.step().await?;
            if state.is_halted() {
                tracing::info!(
                    session = %self.session.name,
                    state = state.name(),
                    iterations = self.iterations,
                    "{}",
                    state
                );
                return Ok(Outcome {
                    state,
                    iterations: self.iterations,
                });
            }
        }
    }

    /// Run a single iteration and return the resulting control state.
    pub async fn step(&mut self) -> Result<ControlState, OrchestratorError> {
        let names = self.registry.names();
        let initial = self.registry.initial().name.clone();

        let (state, source) = match self.document.load(&initial, &names)? {
            Ok(loaded) => loaded,
            Err(err) => {
                let reason = format!("state corrupted: {}", err);
                return Ok(self.halt_blocked(UNKNOWN_PHASE, reason).await);
            }
        };

        match &source {
            StateSource::Fresh => tracing::info!(phase = %state.phase, "New session"),
            StateSource::Recovered(err) => tracing::warn!(
                error = %err,
                phase = %state.phase,
                "Overview unreadable, recovered phase from activity log"
            ),
            StateSource::Parsed => {}
        }
        if state.halted {
            tracing::info!(phase = %state.phase, "Overview is marked halted, resuming");
        }

        let (phase, agent, phase_budget) = match self.registry.lookup(&state.phase) {
            Ok(def) => (def.name.clone(), def.agent.clone(), def.max_iterations),
            Err(err) => {
                let reason = format!("state corrupted: {}", err);
                return Ok(self.halt_blocked(&state.phase, reason).await);
            }
        };

        if let Some(max) = self.settings.max_iterations
            && self.iterations >= max
        {
            let reason = format!("iteration cap of {} reached", max);
            return Ok(self.halt_blocked(&phase, reason).await);
        }

        let streak = match &self.streak {
            Some((last, count)) if *last == phase => count + 1,
            _ => 1,
        };
        self.streak = Some((phase.clone(), streak));
        if streak > self.settings.stall_limit {
            let reason = format!(
                "possible infinite loop: {} consecutive iterations in phase '{}'",
                streak, phase
            );
            return Ok(self.halt_blocked(&phase, reason).await);
        }

        if let Some(budget) = phase_budget {
            let spent = self.history.phase_iterations(&phase);
            if spent >= budget as usize {
                let reason = format!(
                    "phase '{}' exceeded its limit of {} iterations",
                    phase, budget
                );
                return Ok(self.halt_blocked(&phase, reason).await);
            }
        }

        self.iterations += 1;
        tracing::info!(
            iteration = self.iterations,
            session_iteration = state.iteration,
            phase = %phase,
            agent = %agent,
            "Starting iteration"
        );

        let new_session = source == StateSource::Fresh;
        match self.attempt_iteration(&state, &phase, &agent, new_session).await {
            AttemptsOutcome::Accepted(signal) => Ok(self.apply(signal, &state).await),
            AttemptsOutcome::Illegal(detail) => {
                let reason = format!("illegal phase transition: {}", detail);
                Ok(self.halt_blocked(&phase, reason).await)
            }
            AttemptsOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let reason = format!("process failed {} times: {}", attempts, last_error);
                fire(
                    self.notifier.as_ref(),
                    NotificationEvent::RunnerError {
                        session: self.session.name.clone(),
                        phase: phase.clone(),
                        iteration: state.iteration,
                        error: last_error,
                    },
                )
                .await;
                Ok(self.halt(ControlState::Blocked { phase, reason }))
            }
        }
    }

    fn working_dir(&self, state: &StructuredState) -> PathBuf {
        state
            .working_dir
            .as_ref()
            .filter(|dir| dir.is_dir())
            .cloned()
            .unwrap_or_else(|| self.task.main_repo.clone())
    }

    fn payload(
        &self,
        state: &StructuredState,
        phase: &str,
        working_dir: &Path,
        new_session: bool,
    ) -> String {
        ContextBuilder::new(&self.session, &self.task)
            .branch_prefix(self.settings.branch_prefix.as_deref())
            .working_dir(working_dir)
            .phase(phase)
            .iteration(state.iteration)
            .initial_task(if new_session {
                self.settings.initial_task.as_deref()
            } else {
                None
            })
            .build()
    }

    /// Invoke the agent and read its signal, retrying both process failures
    /// and missing or invalid signals within one budget.
    async fn attempt_iteration(
        &self,
        state: &StructuredState,
        phase: &str,
        agent: &str,
        new_session: bool,
    ) -> AttemptsOutcome {
        let working_dir = self.working_dir(state);
        let payload = self.payload(state, phase, &working_dir, new_session);
        let policy = self.settings.retry;
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts {
            match self.store.clear() {
                Ok(Some(previous)) => tracing::debug!(%previous, "Cleared stale signal"),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to clear signal file"),
            }

            let ctx = InvocationContext {
                session_path: self.session.dir.clone(),
                working_dir: working_dir.clone(),
                phase: phase.to_string(),
                agent: agent.to_string(),
                payload: payload.clone(),
                iteration_token: self.iterations,
                attempt,
                session_iteration: state.iteration,
                log_file: self.session.invocation_log(Local::now(), phase, attempt),
            };

            match self.runner.invoke(&ctx, self.settings.timeout).await {
                Err(e) => last_error = e.to_string(),
                Ok(result) => match self.store.read_raw() {
                    Err(e) => last_error = e.to_string(),
                    Ok(SignalRead {
                        payload,
                        result: Err(msg),
                    }) => {
                        let claimed = payload
                            .as_ref()
                            .and_then(|p| p.get("phase"))
                            .and_then(|p| p.as_str())
                            .filter(|p| !p.trim().is_empty())
                            .unwrap_or(phase)
                            .to_string();
                        self.record(
                            attempt,
                            phase,
                            claimed,
                            payload,
                            Verdict::Invalid,
                            Some(msg.clone()),
                        );
                        last_error = SignalError::Validation(msg).to_string();
                    }
                    Ok(SignalRead {
                        payload,
                        result: Ok(signal),
                    }) => {
                        tracing::debug!(
                            attempt,
                            status = %signal.status(),
                            log_file = %result.log_file.display(),
                            "Signal read"
                        );
                        let claimed = signal.phase().to_string();
                        return match self
                            .registry
                            .check_transition(phase, &claimed, signal.status())
                        {
                            Ok(()) => {
                                self.record(
                                    attempt,
                                    phase,
                                    claimed,
                                    payload,
                                    Verdict::Accepted,
                                    None,
                                );
                                AttemptsOutcome::Accepted(signal)
                            }
                            Err(illegal) => {
                                let detail = illegal.to_string();
                                self.record(
                                    attempt,
                                    phase,
                                    claimed,
                                    payload,
                                    Verdict::IllegalTransition,
                                    Some(detail.clone()),
                                );
                                AttemptsOutcome::Illegal(detail)
                            }
                        };
                    }
                },
            }

            tracing::warn!(
                attempt,
                max_attempts = policy.max_attempts,
                error = %last_error,
                "Attempt failed"
            );

            if policy.should_retry(attempt) {
                let delay = policy.delay_after(attempt);
                tracing::info!(delay_secs = delay.as_secs_f64(), "Retrying");
                tokio::time::sleep(delay).await;
            }
        }

        AttemptsOutcome::Exhausted {
            attempts: policy.max_attempts,
            last_error,
        }
    }

    fn record(
        &self,
        attempt: u32,
        from_phase: &str,
        phase: String,
        payload: Option<serde_json::Value>,
        verdict: Verdict,
        detail: Option<String>,
    ) {
        self.history.append(&SignalHistoryRecord {
            iteration: self.iterations,
            timestamp: Utc::now(),
            run_id: self.run_id,
            attempt,
            from_phase: Some(from_phase.to_string()),
            phase,
            signal: payload.unwrap_or(serde_json::Value::Null),
            verdict,
            detail,
        });
    }

    async fn apply(&self, signal: Signal, state: &StructuredState) -> ControlState {
        match signal {
            Signal::Continue { phase } => {
                tracing::info!(from = %state.phase, to = %phase, "Continuing");
                ControlState::Running
            }
            Signal::Waiting { phase, waiting_for } => {
                fire(
                    self.notifier.as_ref(),
                    NotificationEvent::Waiting {
                        session: self.session.name.clone(),
                        phase: phase.clone(),
                        waiting_for,
                    },
                )
                .await;
                self.halt(ControlState::WaitingForHuman { phase, waiting_for })
            }
            Signal::Blocked {
                phase,
                reason,
                needs,
            } => {
                fire(
                    self.notifier.as_ref(),
                    NotificationEvent::Blocked {
                        session: self.session.name.clone(),
                        phase: phase.clone(),
                        reason: reason.clone(),
                        needs: Some(needs),
                    },
                )
                .await;
                self.halt(ControlState::Blocked { phase, reason })
            }
            Signal::Done { phase, summary } => {
                fire(
                    self.notifier.as_ref(),
                    NotificationEvent::Done {
                        session: self.session.name.clone(),
                        phase: phase.clone(),
                        summary: summary.clone(),
                        iterations: self.iterations,
                    },
                )
                .await;
                self.halt(ControlState::Done { phase, summary })
            }
        }
    }

    /// Halt as blocked on an orchestrator-detected condition and notify.
    async fn halt_blocked(&self, phase: &str, reason: String) -> ControlState {
        tracing::error!(phase, %reason, "Blocking session");
        fire(
            self.notifier.as_ref(),
            NotificationEvent::Blocked {
                session: self.session.name.clone(),
                phase: phase.to_string(),
                reason: reason.clone(),
                needs: None,
            },
        )
        .await;
        self.halt(ControlState::Blocked {
            phase: phase.to_string(),
            reason,
        })
    }

    /// Record the halting transition in the overview.
    fn halt(&self, state: ControlState) -> ControlState {
        let phase = match &state {
            ControlState::WaitingForHuman { phase, .. }
            | ControlState::Blocked { phase, .. }
            | ControlState::Done { phase, .. } => phase.as_str(),
            ControlState::Running => return state,
        };

        if let Err(e) = self.document.append_note(phase, &state.to_string()) {
            tracing::warn!(
                path = %self.document.path().display(),
                error = %e,
                "Failed to append note to overview"
            );
        }
        state
    }
}
