//! Best-effort outbound notifications.
//!
//! Only state-changing events are sent: halting for a human, halting on an
//! error, finishing, and exhausting the retry budget. Delivery failures never
//! alter the orchestrator's behaviour; callers go through [`fire`].

mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::errors::NotifyError;
use crate::signals::{BlockedNeed, WaitingFor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Blocked {
        session: String,
        phase: String,
        reason: String,
        needs: Option<BlockedNeed>,
    },
    Waiting {
        session: String,
        phase: String,
        waiting_for: WaitingFor,
    },
    Done {
        session: String,
        phase: String,
        summary: String,
        iterations: u64,
    },
    RunnerError {
        session: String,
        phase: String,
        iteration: u32,
        error: String,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::Blocked { .. } => "blocked",
            NotificationEvent::Waiting { .. } => "waiting",
            NotificationEvent::Done { .. } => "done",
            NotificationEvent::RunnerError { .. } => "runner_error",
        }
    }

    pub fn session(&self) -> &str {
        match self {
            NotificationEvent::Blocked { session, .. }
            | NotificationEvent::Waiting { session, .. }
            | NotificationEvent::Done { session, .. }
            | NotificationEvent::RunnerError { session, .. } => session,
        }
    }

    /// One-line plain text description.
    pub fn summary(&self) -> String {
        match self {
            NotificationEvent::Blocked {
                phase,
                reason,
                needs,
                ..
            } => match needs {
                Some(needs) => format!("blocked in {}: {} (needs {})", phase, reason, needs),
                None => format!("blocked in {}: {}", phase, reason),
            },
            NotificationEvent::Waiting {
                phase, waiting_for, ..
            } => format!("waiting in {} for {}", phase, waiting_for),
            NotificationEvent::Done {
                summary,
                iterations,
                ..
            } => format!("done after {} iterations: {}", iterations, summary),
            NotificationEvent::RunnerError {
                phase,
                iteration,
                error,
                ..
            } => format!("agent failed in {} (iteration {}): {}", phase, iteration, error),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Discards every event.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &NotificationEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes events to the tracing log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        tracing::info!(
            event = event.kind(),
            session = event.session(),
            "{}",
            event.summary()
        );
        Ok(())
    }
}

/// Telegram when credentials are configured, otherwise log-only.
pub fn from_config(config: &RuntimeConfig) -> Arc<dyn Notifier> {
    match &config.telegram {
        Some(credentials) => match TelegramNotifier::new(credentials.clone()) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                tracing::warn!(error = %e, "Telegram notifier unavailable, logging notifications instead");
                Arc::new(LogNotifier)
            }
        },
        None => Arc::new(LogNotifier),
    }
}

/// Deliver an event, logging and discarding any failure.
pub async fn fire(notifier: &dyn Notifier, event: NotificationEvent) {
    if let Err(e) = notifier.notify(&event).await {
        tracing::warn!(event = event.kind(), error = %e, "Notification failed");
    }
}
