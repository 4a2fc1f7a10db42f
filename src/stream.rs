//! Decoding of the agent's `stream-json` output.
//!
//! The raw lines are always written to the invocation log untouched; this
//! module only turns them into short progress descriptions for tracing and
//! picks out the final result event.

use serde::Deserialize;
use serde_json::Value;

/// One line of the agent's event stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentEvent {
    Assistant {
        message: AssistantMessage,
    },
    User {},
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: Option<u32>,
    },
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// What a single stream line amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Tool calls and text snippets, in message order.
    Activity(Vec<String>),
    Finished {
        is_error: bool,
        turns: Option<u32>,
        summary: Option<String>,
    },
}

/// Decode one stdout line. Lines that are not JSON events, and events with
/// nothing worth reporting, yield `None`.
pub fn decode_line(line: &str) -> Option<Progress> {
    let event: AgentEvent = serde_json::from_str(line.trim()).ok()?;
    match event {
        AgentEvent::Assistant { message } => {
            let items: Vec<String> = message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { name, input } => Some(describe_tool_use(name, input)),
                    ContentBlock::Text { text } if !text.trim().is_empty() => {
                        Some(first_line(text, 80))
                    }
                    _ => None,
                })
                .collect();
            (!items.is_empty()).then_some(Progress::Activity(items))
        }
        AgentEvent::Result {
            subtype,
            result,
            is_error,
            num_turns,
        } => Some(Progress::Finished {
            is_error: is_error || subtype.starts_with("error"),
            turns: num_turns,
            summary: result.map(|r| first_line(&r, 120)),
        }),
        AgentEvent::User {} | AgentEvent::System { .. } => None,
    }
}

/// Short description of a tool call, e.g. `Editing: src/lib.rs`.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Read" | "Write" | "Edit" => {
            let verb = match name {
                "Read" => "Reading",
                "Write" => "Creating",
                _ => "Editing",
            };
            let path = field("file_path").map(shorten_path).unwrap_or("file");
            format!("{}: {}", verb, path)
        }
        "Bash" => format!(
            "Running: {}",
            field("command").map(|c| truncate(c, 40)).unwrap_or_else(|| "command".into())
        ),
        "Glob" | "Grep" => format!("Searching: {}", field("pattern").unwrap_or("*")),
        "Task" => format!("Agent: {}", field("description").unwrap_or("subagent")),
        _ => name.to_string(),
    }
}

/// Last two components of a path.
fn shorten_path(path: &str) -> &str {
    match path.rmatch_indices('/').nth(1) {
        Some((idx, _)) => &path[idx + 1..],
        None => path,
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    truncate(text.lines().next().unwrap_or(text).trim(), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_tool_use_and_text() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Looking at auth\nmore"},{"type":"tool_use","name":"Read","input":{"file_path":"/repo/src/auth/mod.rs"},"id":"1"}]},"session_id":"s"}"#;
        assert_eq!(
            decode_line(line),
            Some(Progress::Activity(vec![
                "Looking at auth".to_string(),
                "Reading: auth/mod.rs".to_string()
            ]))
        );
    }

    #[test]
    fn test_decode_result() {
        let line = r#"{"type":"result","subtype":"success","result":"All done","is_error":false,"num_turns":12}"#;
        assert_eq!(
            decode_line(line),
            Some(Progress::Finished {
                is_error: false,
                turns: Some(12),
                summary: Some("All done".into())
            })
        );

        let line = r#"{"type":"result","subtype":"error_max_turns"}"#;
        assert!(matches!(
            decode_line(line),
            Some(Progress::Finished { is_error: true, .. })
        ));
    }

    #[test]
    fn test_decode_ignores_noise() {
        assert_eq!(decode_line("plain text output"), None);
        assert_eq!(decode_line(r#"{"type":"system","subtype":"init"}"#), None);
        assert_eq!(decode_line(r#"{"type":"user","message":{}}"#), None);
        assert_eq!(decode_line(r#"{"type":"unknown"}"#), None);
        assert_eq!(
            decode_line(r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"x"}]}}"#),
            None
        );
    }

    #[test]
    fn test_describe_tool_use() {
        assert_eq!(
            describe_tool_use("Edit", &json!({"file_path": "a.rs"})),
            "Editing: a.rs"
        );
        assert_eq!(describe_tool_use("Write", &json!({})), "Creating: file");
        assert_eq!(
            describe_tool_use("Bash", &json!({"command": "cargo test --workspace --all-features -- --nocapture"})),
            "Running: cargo test --workspace --all-features..."
        );
        assert_eq!(describe_tool_use("WebFetch", &json!({})), "WebFetch");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("short", 8), "short");
    }
}
