//! Conversation records shown to the UI

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    Complete,
    /// Cancelled mid-stream; content so far is kept
    Interrupted,
    Failed,
}

/// A tool invocation reported by the backend within one assistant turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandToolUse {
    pub id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip)]
    started_at: Option<Instant>,
}

impl CommandToolUse {
    pub fn is_complete(&self) -> bool {
        self.output.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_uses: Vec<CommandToolUse>,
    pub is_streaming: bool,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
}

impl CommandMessage {
    pub(crate) fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: text.into(),
            tool_uses: Vec::new(),
            is_streaming: false,
            status: MessageStatus::Complete,
            error: None,
        }
    }

    pub(crate) fn assistant_pending() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            tool_uses: Vec::new(),
            is_streaming: true,
            status: MessageStatus::Streaming,
            error: None,
        }
    }

    pub(crate) fn append(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    pub(crate) fn start_tool(
        &mut self,
        id: String,
        tool_name: String,
        input: serde_json::Value,
        now: Instant,
    ) {
        self.tool_uses.push(CommandToolUse {
            id,
            tool_name,
            input,
            output: None,
            duration_ms: None,
            started_at: Some(now),
        });
    }

    /// Returns false when no tool with that id was started
    pub(crate) fn finish_tool(&mut self, id: &str, output: String, now: Instant) -> bool {
        let Some(tool) = self.tool_uses.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        tool.duration_ms = tool
            .started_at
            .map(|t| now.saturating_duration_since(t).as_millis() as u64);
        tool.output = Some(output);
        true
    }

    pub(crate) fn close(&mut self, status: MessageStatus) {
        self.is_streaming = false;
        self.status = status;
    }

    pub(crate) fn fail(&mut self, error: SessionError) {
        self.close(MessageStatus::Failed);
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tool_use_duration() {
        let start = Instant::now();
        let mut msg = CommandMessage::assistant_pending();
        msg.start_tool("t1".into(), "search".into(), serde_json::json!({"q": "rust"}), start);
        assert!(!msg.tool_uses[0].is_complete());

        assert!(msg.finish_tool("t1", "3 hits".into(), start + Duration::from_millis(250)));
        assert_eq!(msg.tool_uses[0].duration_ms, Some(250));
        assert!(!msg.finish_tool("missing", "x".into(), start));
    }

    #[test]
    fn test_fail_keeps_content() {
        let mut msg = CommandMessage::assistant_pending();
        msg.append("partial ");
        msg.fail(SessionError::AssistantDispatch {
            reason: "boom".into(),
        });
        assert_eq!(msg.content, "partial ");
        assert!(!msg.is_streaming);
        assert_eq!(msg.status, MessageStatus::Failed);
        assert!(msg.error.is_some());
    }

    #[test]
    fn test_message_serialization_skips_instants() {
        let mut msg = CommandMessage::assistant_pending();
        msg.start_tool("t1".into(), "ls".into(), serde_json::Value::Null, Instant::now());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
        assert!(json.contains(r#""tool_name":"ls""#));
        assert!(!json.contains("started_at"));
    }
}
