//! Consumer-facing conversation messages.
//!
//! A [`UiMessage`] is what a chat client renders: an id, a role, and an
//! ordered list of [`MessagePart`]s. Assistant messages interleave text,
//! reasoning, tool calls, and tool results in the order they streamed.
//!
//! Model adapters never see these types directly.
//! [`ui_to_model_messages`] and [`model_to_ui_messages`] convert between
//! the two views of the same history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChatMessage, ChatRole, ContentBlock, ToolCall, ToolResult};

/// Generates a fresh message id.
pub fn generate_message_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4())
}

/// A message as a chat UI sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    /// Stable id; never changes once the message is in a list.
    pub id: String,
    /// Author role. Tool results live inside assistant messages, so this
    /// is never [`ChatRole::Tool`] for messages built by this crate.
    pub role: ChatRole,
    /// Ordered parts.
    pub parts: Vec<MessagePart>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// One renderable piece of a [`UiMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    /// Plain text.
    Text {
        /// The text.
        content: String,
    },
    /// Model reasoning. Never sent back to the model.
    Thinking {
        /// The reasoning text.
        content: String,
    },
    /// A tool call and its lifecycle.
    ToolCall(ToolCallPart),
    /// The result of a tool call.
    ToolResult(ToolResultPart),
}

/// A tool call inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    /// Provider-issued call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments received so far.
    pub arguments: String,
    /// Lifecycle state.
    pub state: ToolCallState,
    /// Approval metadata, present once the call was gated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalMeta>,
    /// Output of a client-executed tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Lifecycle of a tool-call part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    /// Announced, no argument fragments yet.
    AwaitingInput,
    /// Argument fragments are arriving.
    InputStreaming,
    /// All fragments received.
    InputComplete,
    /// Waiting on a user decision.
    ApprovalRequested,
    /// The user decided.
    ApprovalResponded,
    /// A result is available.
    OutputAvailable,
    /// The tool failed.
    OutputError,
}

impl ToolCallState {
    /// Whether the argument buffer is final.
    pub fn has_complete_input(self) -> bool {
        !matches!(self, Self::AwaitingInput | Self::InputStreaming)
    }
}

/// Approval bookkeeping on a tool-call part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalMeta {
    /// Id the approval response must reference.
    pub id: String,
    /// Always `true` for gated calls.
    pub needs_approval: bool,
    /// The decision, once made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

/// A tool result inside an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    /// The call this result answers.
    pub tool_call_id: String,
    /// Result text.
    pub content: String,
    /// Result state.
    pub state: ToolResultState,
    /// Error text when `state` is [`ToolResultState::Error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of a tool-result part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolResultState {
    /// Content still arriving.
    Streaming,
    /// Final content.
    Complete,
    /// The tool failed.
    Error,
}

impl UiMessage {
    /// Creates a message with a fresh id and the current time.
    pub fn new(role: ChatRole, parts: Vec<MessagePart>) -> Self {
        Self {
            id: generate_message_id(),
            role,
            parts,
            created_at: Some(Utc::now()),
        }
    }

    /// A user message with one text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(
            ChatRole::User,
            vec![MessagePart::Text {
                content: text.into(),
            }],
        )
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Finds a tool-call part by call id.
    pub fn tool_call(&self, id: &str) -> Option<&ToolCallPart> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::ToolCall(tc) if tc.id == id => Some(tc),
            _ => None,
        })
    }

    /// Mutable variant of [`tool_call`](Self::tool_call).
    pub fn tool_call_mut(&mut self, id: &str) -> Option<&mut ToolCallPart> {
        self.parts.iter_mut().find_map(|p| match p {
            MessagePart::ToolCall(tc) if tc.id == id => Some(tc),
            _ => None,
        })
    }

    /// Whether a tool-result part for `tool_call_id` exists.
    pub fn has_tool_result(&self, tool_call_id: &str) -> bool {
        self.parts.iter().any(
            |p| matches!(p, MessagePart::ToolResult(r) if r.tool_call_id == tool_call_id),
        )
    }
}

// ── UI → model ──────────────────────────────────────────────────────

/// Converts UI messages into the model-facing history.
///
/// Assistant parts are walked in order. Text and input-complete tool
/// calls accumulate into one assistant message, which is flushed whenever
/// a finished tool-result part is reached so that every result follows
/// its call. Thinking parts and still-streaming tool calls are dropped.
pub fn ui_to_model_messages(messages: &[UiMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role != ChatRole::Assistant {
            let text = msg.text();
            let mut content = Vec::new();
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
            for part in &msg.parts {
                if let Some(result) = finished_result(part) {
                    content.push(ContentBlock::ToolResult(result));
                }
            }
            out.push(ChatMessage {
                role: msg.role,
                content,
            });
            continue;
        }

        let mut text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();
        for part in &msg.parts {
            match part {
                MessagePart::Text { content } => text.push_str(content),
                MessagePart::ToolCall(tc)
                    if tc.state.has_complete_input() || tc.output.is_some() =>
                {
                    calls.push(ToolCall::new(&tc.id, &tc.name, &tc.arguments));
                }
                MessagePart::ToolResult(_) => {
                    if let Some(result) = finished_result(part) {
                        flush_assistant(&mut out, &mut text, &mut calls);
                        out.push(ChatMessage::tool_result(result));
                    }
                }
                _ => {}
            }
        }
        flush_assistant(&mut out, &mut text, &mut calls);
    }
    out
}

fn finished_result(part: &MessagePart) -> Option<ToolResult> {
    match part {
        MessagePart::ToolResult(r) if r.state != ToolResultState::Streaming => Some(ToolResult {
            tool_call_id: r.tool_call_id.clone(),
            content: r.content.clone(),
            is_error: r.state == ToolResultState::Error,
        }),
        _ => None,
    }
}

fn flush_assistant(out: &mut Vec<ChatMessage>, text: &mut String, calls: &mut Vec<ToolCall>) {
    if text.is_empty() && calls.is_empty() {
        return;
    }
    out.push(ChatMessage::assistant_with_calls(
        std::mem::take(text),
        std::mem::take(calls),
    ));
}

// ── model → UI ──────────────────────────────────────────────────────

/// Converts a model-facing history into UI messages.
///
/// Tool-role messages are merged into the preceding assistant message as
/// tool-result parts. A tool message with no assistant before it becomes
/// a standalone assistant message.
pub fn model_to_ui_messages(messages: &[ChatMessage]) -> Vec<UiMessage> {
    let mut out: Vec<UiMessage> = Vec::with_capacity(messages.len());
    let mut merge_target: Option<usize> = None;

    for msg in messages {
        let parts = model_parts(msg);
        match (msg.role, merge_target) {
            (ChatRole::Tool, Some(idx)) => out[idx].parts.extend(parts),
            (ChatRole::Tool, None) => {
                out.push(UiMessage::new(ChatRole::Assistant, parts));
            }
            (role, _) => {
                out.push(UiMessage::new(role, parts));
                merge_target = (role == ChatRole::Assistant).then(|| out.len() - 1);
            }
        }
    }
    out
}

fn model_parts(msg: &ChatMessage) -> Vec<MessagePart> {
    msg.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if text.is_empty() => None,
            ContentBlock::Text { text } => Some(MessagePart::Text {
                content: text.clone(),
            }),
            ContentBlock::ToolCall(call) => Some(MessagePart::ToolCall(ToolCallPart {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                state: ToolCallState::InputComplete,
                approval: None,
                output: None,
            })),
            ContentBlock::ToolResult(result) => Some(MessagePart::ToolResult(ToolResultPart {
                tool_call_id: result.tool_call_id.clone(),
                content: result.content.clone(),
                state: if result.is_error {
                    ToolResultState::Error
                } else {
                    ToolResultState::Complete
                },
                error: result.is_error.then(|| result.content.clone()),
            })),
        })
        .collect()
}
