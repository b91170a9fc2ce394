//! Applies processor callbacks to the client's assistant message.

use std::collections::HashMap;
use std::sync::Arc;

use super::state::Shared;
use crate::chat::ToolResult;
use crate::message::{
    ApprovalMeta, MessagePart, ToolCallPart, ToolCallState, ToolResultPart, ToolResultState,
    UiMessage,
};
use crate::processor::{StreamHandlers, ToolCallUpdate};
use crate::stream::{ApprovalRequest, ClientToolRequest};

/// Writes one run's output into the assistant message `message_id`.
///
/// Text is split into parts at every tool call and tool result, so the
/// message reads in the order things streamed. Updates against a message
/// that no longer exists (after `clear`) are dropped.
pub(crate) struct ClientSink {
    shared: Arc<Shared>,
    message_id: String,
    text_part: Option<usize>,
    segment_start: usize,
    text_len: usize,
    thinking_part: Option<usize>,
    tool_parts: HashMap<u32, usize>,
    client_requests: Vec<ClientToolRequest>,
}

impl ClientSink {
    pub(crate) fn new(shared: Arc<Shared>, message_id: String) -> Self {
        Self {
            shared,
            message_id,
            text_part: None,
            segment_start: 0,
            text_len: 0,
            thinking_part: None,
            tool_parts: HashMap::new(),
            client_requests: Vec::new(),
        }
    }

    /// Client tool requests seen during the run.
    pub(crate) fn take_client_requests(&mut self) -> Vec<ClientToolRequest> {
        std::mem::take(&mut self.client_requests)
    }

    fn update(&self, f: impl FnOnce(&mut UiMessage)) {
        self.shared.update_message(&self.message_id, f);
    }

    fn break_text(&mut self) {
        self.text_part = None;
        self.segment_start = self.text_len;
    }

    /// Appends a part and returns its position.
    fn push_part(&self, part: MessagePart) -> Option<usize> {
        let mut position = None;
        self.update(|msg| {
            msg.parts.push(part);
            position = Some(msg.parts.len() - 1);
        });
        position
    }
}

impl StreamHandlers for ClientSink {
    fn on_text_update(&mut self, content: &str) {
        self.text_len = content.len();
        let segment = content.get(self.segment_start..).unwrap_or_default().to_owned();
        match self.text_part {
            Some(position) => self.update(|msg| {
                if let Some(MessagePart::Text { content }) = msg.parts.get_mut(position) {
                    *content = segment;
                }
            }),
            None if segment.is_empty() => {}
            None => self.text_part = self.push_part(MessagePart::Text { content: segment }),
        }
    }

    fn on_thinking_update(&mut self, content: &str) {
        let content = content.to_owned();
        match self.thinking_part {
            Some(position) => self.update(|msg| {
                if let Some(MessagePart::Thinking { content: existing }) = msg.parts.get_mut(position) {
                    *existing = content;
                }
            }),
            None => self.thinking_part = self.push_part(MessagePart::Thinking { content }),
        }
    }

    fn on_tool_call_start(&mut self, index: u32, id: &str, name: &str) {
        self.break_text();
        let part = MessagePart::ToolCall(ToolCallPart {
            id: id.to_owned(),
            name: name.to_owned(),
            arguments: String::new(),
            state: ToolCallState::AwaitingInput,
            approval: None,
            output: None,
        });
        if let Some(position) = self.push_part(part) {
            self.tool_parts.insert(index, position);
        }
    }

    fn on_tool_call_state_change(&mut self, update: &ToolCallUpdate<'_>) {
        let Some(&position) = self.tool_parts.get(&update.index) else {
            return;
        };
        self.update(|msg| {
            if let Some(MessagePart::ToolCall(part)) = msg.parts.get_mut(position) {
                if part.id.is_empty() {
                    update.id.clone_into(&mut part.id);
                }
                if part.name.is_empty() {
                    update.name.clone_into(&mut part.name);
                }
                update.arguments.clone_into(&mut part.arguments);
                part.state = update.state;
            }
        });
    }

    fn on_tool_result(&mut self, result: &ToolResult) {
        self.break_text();
        let part = MessagePart::ToolResult(ToolResultPart {
            tool_call_id: result.tool_call_id.clone(),
            content: result.content.clone(),
            state: if result.is_error {
                ToolResultState::Error
            } else {
                ToolResultState::Complete
            },
            error: result.is_error.then(|| result.content.clone()),
        });
        self.update(|msg| {
            if let Some(call) = msg.tool_call_mut(&result.tool_call_id) {
                call.state = if result.is_error {
                    ToolCallState::OutputError
                } else {
                    ToolCallState::OutputAvailable
                };
            }
            msg.parts.push(part);
        });
    }

    fn on_approval_requested(&mut self, request: &ApprovalRequest) {
        self.update(|msg| {
            if let Some(call) = msg.tool_call_mut(&request.tool_call_id) {
                call.state = ToolCallState::ApprovalRequested;
                call.approval = Some(ApprovalMeta {
                    id: request.approval_id.clone(),
                    needs_approval: true,
                    approved: None,
                });
            }
        });
    }

    fn on_tool_input_available(&mut self, request: &ClientToolRequest) {
        self.client_requests.push(request.clone());
    }
}
