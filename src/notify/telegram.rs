use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{NotificationEvent, Notifier};
use crate::config::TelegramCredentials;
use crate::errors::NotifyError;

const TELEGRAM_API: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_CHARS: usize = 500;

/// Sends events through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: Client,
    credentials: TelegramCredentials,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(credentials: TelegramCredentials) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            credentials,
            api_base: TELEGRAM_API.to_string(),
        })
    }

    /// Point at a different API host.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.credentials.bot_token
        )
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let payload = json!({
            "chat_id": self.credentials.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self.client.post(self.url()).json(&payload).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: response.status().as_u16(),
            })
        }
    }
}

/// Backticks would end the inline code spans the message uses.
fn code(value: &str) -> String {
    format!("`{}`", value.replace('`', "'"))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}

/// Markdown body of the Telegram message for an event.
pub fn render(event: &NotificationEvent) -> String {
    match event {
        NotificationEvent::Blocked {
            session,
            phase,
            reason,
            needs,
        } => {
            let needs = needs
                .map(|n| format!("\n*Needs:* {}", code(n.as_str())))
                .unwrap_or_default();
            format!(
                "*Shepherd Blocked*\n\n*Session:* {}\n*Phase:* {}\n*Reason:* {}{}\n\nCheck session files.",
                code(session),
                code(phase),
                code(reason),
                needs
            )
        }
        NotificationEvent::Waiting {
            session,
            phase,
            waiting_for,
        } => format!(
            "*Shepherd Waiting*\n\n*Session:* {}\n*Phase:* {}\n*Waiting for:* {}\n\nCheck session files.",
            code(session),
            code(phase),
            code(waiting_for.as_str())
        ),
        NotificationEvent::Done {
            session,
            summary,
            iterations,
            ..
        } => format!(
            "*Shepherd Complete*\n\n*Session:* {}\n*Iterations:* {}\n*Summary:* {}",
            code(session),
            iterations,
            code(summary)
        ),
        NotificationEvent::RunnerError {
            session,
            phase,
            iteration,
            error,
        } => format!(
            "*Shepherd Error*\n\n*Session:* {}\n*Phase:* {}\n*Iteration:* {}\n*Error:* {}\n\nCheck logs for full details.",
            code(session),
            code(phase),
            iteration,
            code(&truncate(error, MAX_ERROR_CHARS))
        ),
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    /// One retry on timeout or connection failure; other failures are final.
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let text = render(event);
        match self.send(&text).await {
            Err(NotifyError::Http(e)) if e.is_timeout() || e.is_connect() => {
                tracing::warn!(error = %e, "Telegram delivery failed, retrying once");
                self.send(&text).await
            }
            result => result,
        }
    }
}
