mod backend;
mod cli;
mod message;
mod queue;

pub use backend::{
    AssistantBackend, AssistantEvent, AssistantEventKind, TurnEvent, TurnSink, UnconfiguredBackend,
};
pub use cli::{parse_line, BackendLine, CliBackend};
pub use message::{CommandMessage, CommandToolUse, MessageStatus, Role};
pub use queue::{AssistantCommandQueue, QueueNotice};
