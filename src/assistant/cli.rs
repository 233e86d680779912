//! Assistant backend that runs a local command per turn
//!
//! The user text goes to the child's stdin; the session id is exported as
//! `ASSISTANT_SESSION_ID`. Stdout is read line by line: JSON lines follow
//! [`BackendLine`], anything else is treated as plain reply text.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::AssistantError;

use super::backend::{AssistantBackend, TurnEvent, TurnSink};

/// One line of structured backend output
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendLine {
    Delta {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        #[serde(default)]
        output: String,
    },
    Done,
    Error {
        message: String,
    },
}

/// Parse one stdout line; `Ok(None)` for blank lines
pub fn parse_line(line: &str) -> Result<Option<BackendLine>, AssistantError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !trimmed.starts_with('{') {
        return Ok(Some(BackendLine::Delta {
            text: format!("{line}\n"),
        }));
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| AssistantError::Protocol(format!("{e}: {trimmed}")))
}

#[derive(Debug, Clone)]
pub struct CliBackend {
    program: String,
    args: Vec<String>,
}

impl CliBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args...]` list
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl AssistantBackend for CliBackend {
    async fn start_turn(
        &self,
        session_id: &str,
        text: &str,
        sink: TurnSink,
    ) -> Result<(), AssistantError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("ASSISTANT_SESSION_ID", session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AssistantError::Spawn(format!("{}: {e}", self.program)))?;

        info!(program = %self.program, turn_id = sink.turn_id(), "assistant process started");

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| AssistantError::Backend(format!("failed to write prompt: {e}")))?;
            // dropping stdin signals end of input
        }

        // Drain stderr concurrently so a chatty child cannot block on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AssistantError::Backend("stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut done = false;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AssistantError::Backend(format!("failed to read output: {e}")))?
        {
            let Some(parsed) = parse_line(&line)? else {
                continue;
            };
            debug!(?parsed, "assistant output");
            let event = match parsed {
                BackendLine::Delta { text } => TurnEvent::ContentDelta(text),
                BackendLine::ToolUse { id, name, input } => TurnEvent::ToolUseStarted { id, name, input },
                BackendLine::ToolResult { id, output } => TurnEvent::ToolUseFinished { id, output },
                BackendLine::Done => {
                    done = true;
                    continue;
                }
                BackendLine::Error { message } => return Err(AssistantError::Backend(message)),
            };
            if !sink.send(event).await {
                break;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AssistantError::Backend(format!("failed to wait for process: {e}")))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() || done {
            return Ok(());
        }
        warn!(%status, "assistant process failed");
        let detail = stderr.trim();
        Err(AssistantError::Backend(if detail.is_empty() {
            format!("process exited with {status}")
        } else {
            format!("process exited with {status}: {detail}")
        }))
    }
}
