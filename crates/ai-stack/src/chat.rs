//! Model-facing conversation types.
//!
//! A model adapter receives a list of [`ChatMessage`]s. Each message has a
//! [`ChatRole`] and a list of [`ContentBlock`]s: plain text, tool calls the
//! assistant requested, and tool results fed back to the model.
//!
//! Tool-call arguments are stored exactly as the model streamed them, as a
//! raw JSON string. Parsing happens when the tool is about to run, so a
//! malformed buffer becomes a tool error rather than a stream failure.
//!
//! ```rust
//! use ai_stack::{ChatMessage, ContentBlock, ToolCall};
//!
//! let msg = ChatMessage::assistant_with_calls(
//!     "Let me check.",
//!     vec![ToolCall::new("call_1", "get_weather", r#"{"city":"Paris"}"#)],
//! );
//! assert_eq!(msg.text(), "Let me check.");
//! assert_eq!(msg.tool_calls().len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::FinishReason;
use crate::usage::Usage;

/// The author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that frame the conversation.
    System,
    /// The human side of the conversation.
    User,
    /// The model.
    Assistant,
    /// Results of tool executions.
    Tool,
}

/// A single message in the model-facing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message.
    pub role: ChatRole,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation requested by the assistant.
    ToolCall(ToolCall),
    /// The outcome of a tool invocation.
    ToolResult(ToolResult),
}

/// A model-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-issued identifier, echoed back in the matching [`ToolResult`].
    pub id: String,
    /// The tool to invoke.
    pub name: String,
    /// Raw JSON arguments, concatenated from stream fragments.
    pub arguments: String,
}

impl ToolCall {
    /// Creates a tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parses the raw argument buffer. An empty buffer parses as `{}`.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }
}

/// The outcome of running a tool, sent back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result answers.
    pub tool_call_id: String,
    /// Text output (or error text when `is_error` is set).
    pub content: String,
    /// Whether the tool failed.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// A failed result.
    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

impl ChatMessage {
    /// A user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(ChatRole::User, text)
    }

    /// An assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(ChatRole::Assistant, text)
    }

    /// A system message with a single text block.
    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(ChatRole::System, text)
    }

    /// An assistant message carrying text (omitted when empty) followed by
    /// tool calls.
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
        content.extend(calls.into_iter().map(ContentBlock::ToolCall));
        Self {
            role: ChatRole::Assistant,
            content,
        }
    }

    /// A tool-role message carrying one result.
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: ChatRole::Tool,
            content: vec![ContentBlock::ToolResult(result)],
        }
    }

    fn text_message(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenation of every text block.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The tool calls in this message, in order.
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// The tool results in this message, in order.
    pub fn tool_results(&self) -> Vec<&ToolResult> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect()
    }
}

/// A fully collected model turn, as returned by
/// [`Provider::generate`](crate::Provider::generate).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Accumulated text.
    pub content: String,
    /// Finalized tool calls, in ascending stream index.
    pub tool_calls: Vec<ToolCall>,
    /// Why the model stopped, if a `done` event arrived.
    pub finish_reason: Option<FinishReason>,
    /// Token usage reported by the adapter.
    pub usage: Usage,
}

impl ChatResponse {
    /// Converts the response into an assistant message for the history.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::assistant_with_calls(self.content, self.tool_calls)
    }
}
