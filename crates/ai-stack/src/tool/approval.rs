//! Approval gates, client-side tools, and per-turn call planning.
//!
//! Before any tool runs, every finalized call of a turn is sorted into
//! one of four outcomes: resolved without running (unknown tool, bad
//! arguments, denial, or an output the client already supplied),
//! waiting on an approval decision, waiting on the client to run it, or
//! ready for server execution. Decisions and client outputs arrive on a
//! later run through [`ClientState`].

use std::collections::HashMap;

use serde_json::Value;

use super::ToolOutput;
use super::registry::{ToolKind, ToolRegistry, parse_arguments};
use crate::chat::{ToolCall, ToolResult};
use crate::message::{ApprovalMeta, MessagePart, ToolCallState, UiMessage};
use crate::stream::{ApprovalRequest, ClientToolRequest};

/// The approval id for a tool call.
///
/// ```rust
/// assert_eq!(ai_stack::tool::approval_id_for("call_1"), "approval_call_1");
/// ```
pub fn approval_id_for(tool_call_id: &str) -> String {
    format!("approval_{tool_call_id}")
}

/// A result produced by the client for a client-side tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientToolOutput {
    /// The output value.
    pub output: Value,
    /// Whether the tool failed.
    pub is_error: bool,
}

/// Decisions and outputs supplied by the consumer between runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientState {
    /// Approval decisions keyed by approval id.
    pub approvals: HashMap<String, bool>,
    /// Client tool outputs keyed by tool call id.
    pub tool_outputs: HashMap<String, ClientToolOutput>,
}

impl ClientState {
    /// Collects decisions and outputs recorded on assistant tool-call parts.
    pub fn from_ui_messages(messages: &[UiMessage]) -> Self {
        let mut state = Self::default();
        let parts = messages.iter().flat_map(|m| m.parts.iter());
        for part in parts {
            let MessagePart::ToolCall(call) = part else {
                continue;
            };
            if let Some(ApprovalMeta {
                id,
                approved: Some(approved),
                ..
            }) = &call.approval
            {
                state.approvals.insert(id.clone(), *approved);
            }
            if let Some(output) = &call.output {
                state.tool_outputs.insert(
                    call.id.clone(),
                    ClientToolOutput {
                        output: output.clone(),
                        is_error: call.state == ToolCallState::OutputError,
                    },
                );
            }
        }
        state
    }

    /// Whether nothing was supplied.
    pub fn is_empty(&self) -> bool {
        self.approvals.is_empty() && self.tool_outputs.is_empty()
    }
}

/// What happens to one finalized call.
#[derive(Debug)]
pub(crate) enum PlannedCall {
    /// Settled without running an executor.
    Resolved(ToolResult),
    /// Waiting on an approval decision.
    NeedsApproval(ApprovalRequest),
    /// Waiting on the client to run it.
    NeedsClient(ClientToolRequest),
    /// Ready for the server executor.
    Execute {
        /// The call.
        call: ToolCall,
        /// Parsed arguments.
        input: Value,
    },
}

/// Plans every call, preserving call order.
pub(crate) fn plan_tool_calls(
    calls: &[ToolCall],
    registry: &ToolRegistry,
    client: &ClientState,
) -> Vec<PlannedCall> {
    calls.iter().map(|call| plan_one(call, registry, client)).collect()
}

fn plan_one(call: &ToolCall, registry: &ToolRegistry, client: &ClientState) -> PlannedCall {
    let Some(kind) = registry.lookup(&call.name) else {
        return PlannedCall::Resolved(ToolResult::error(
            &call.id,
            format!("Unknown tool: {}", call.name),
        ));
    };
    let input = match parse_arguments(call) {
        Ok(input) => input,
        Err(e) => return PlannedCall::Resolved(ToolResult::error(&call.id, e.message)),
    };

    if kind.definition().needs_approval {
        let approval_id = approval_id_for(&call.id);
        match client.approvals.get(&approval_id) {
            None => {
                return PlannedCall::NeedsApproval(ApprovalRequest {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input,
                    approval_id,
                });
            }
            Some(false) => {
                return PlannedCall::Resolved(ToolResult::error(
                    &call.id,
                    format!("User denied approval for tool '{}'", call.name),
                ));
            }
            Some(true) => {}
        }
    }

    match kind {
        ToolKind::Client(_) => match client.tool_outputs.get(&call.id) {
            Some(out) => {
                let content = ToolOutput::from(out.output.clone()).content;
                PlannedCall::Resolved(ToolResult {
                    tool_call_id: call.id.clone(),
                    content,
                    is_error: out.is_error,
                })
            }
            None => PlannedCall::NeedsClient(ClientToolRequest {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                input,
            }),
        },
        ToolKind::Server(_) => PlannedCall::Execute {
            call: call.clone(),
            input,
        },
    }
}
