//! Normalized stream events.
//!
//! Model adapters yield [`StreamEvent`]s through a [`ChatStream`]. Every
//! event is an envelope carrying the stream id, a millisecond timestamp,
//! and an [`EventKind`] payload. On the wire the envelope is one flat JSON
//! object discriminated by `type`:
//!
//! ```json
//! {"id":"stream-1","timestamp":1718000000000,"type":"content","delta":"Hel"}
//! ```
//!
//! # Tool-call reassembly
//!
//! Tool calls arrive as [`ToolCallDelta`](EventKind::ToolCallDelta)
//! fragments keyed by `index`. The first delta for an index carries the
//! call's `tool_call_id` and `name`; later deltas only append to `arguments`.
//! Fragments for different indices may interleave freely. A
//! [`ToolCallComplete`](EventKind::ToolCallComplete) finalizes one index,
//! and a [`Done`](EventKind::Done) finalizes all of them.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ToolResult;
use crate::error::LlmError;
use crate::usage::Usage;

/// A pinned, boxed, `Send` stream of [`StreamEvent`] results.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Generates a fresh stream id.
pub fn new_stream_id() -> String {
    format!("stream-{}", uuid::Uuid::new_v4())
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// One normalized unit of incremental model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Opaque id shared by every event of one stream.
    pub id: String,
    /// Milliseconds since the Unix epoch at creation.
    pub timestamp: u64,
    /// The event payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Payload of a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventKind {
    /// A text fragment.
    Content {
        /// The new text.
        delta: String,
    },
    /// A fragment of the model's reasoning output.
    Thinking {
        /// The new reasoning text.
        delta: String,
    },
    /// A fragment of a tool call.
    ToolCallDelta {
        /// Stable per-call index within one turn.
        index: u32,
        /// Provider-issued call id; present on the first fragment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        /// Tool name; present on the first fragment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Argument fragment to append.
        #[serde(default)]
        arguments: String,
    },
    /// The call at `index` has received all of its fragments.
    ToolCallComplete {
        /// Which call completed.
        index: u32,
    },
    /// A tool finished on the server side of the loop.
    ToolResult(ToolResult),
    /// A tool is waiting for a user decision.
    ApprovalRequested(ApprovalRequest),
    /// A client-side tool should run at the consumer.
    ToolInputAvailable(ClientToolRequest),
    /// The stream failed.
    Error {
        /// Human-readable error text.
        message: String,
        /// Optional machine-readable code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// The model turn ended.
    Done {
        /// Why the model stopped.
        finish_reason: FinishReason,
        /// Token usage for the turn, if reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

/// Why a model turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    Stop,
    /// Token limit reached.
    Length,
    /// The model wants tools to run.
    ToolCalls,
    /// The provider filtered the output.
    ContentFilter,
    /// The turn ended because of an error.
    Error,
}

/// A tool call suspended on a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// The suspended call.
    pub tool_call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Parsed arguments.
    pub input: Value,
    /// Id the consumer passes back with its decision.
    pub approval_id: String,
}

/// A tool call the consumer is expected to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientToolRequest {
    /// The call to answer with a result.
    pub tool_call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Parsed arguments.
    pub input: Value,
}

impl StreamEvent {
    /// Creates an event stamped with the current time.
    pub fn new(id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: id.into(),
            timestamp: now_millis(),
            kind,
        }
    }

    /// Replaces the stream id, keeping the payload and timestamp.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Builds an `error` event describing `err`.
    pub fn from_error(id: impl Into<String>, err: &LlmError) -> Self {
        let message = match err {
            LlmError::Provider { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self::new(
            id,
            EventKind::Error {
                message,
                code: Some(err.code().to_owned()),
            },
        )
    }

    /// Converts an `error` event into the matching [`LlmError`].
    /// Returns `None` for every other kind.
    pub fn as_error(&self) -> Option<LlmError> {
        match &self.kind {
            EventKind::Error { message, code } => {
                Some(LlmError::from_stream_error(message.clone(), code.clone()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_content_event_wire_shape() {
        let event = StreamEvent {
            id: "s1".into(),
            timestamp: 42,
            kind: EventKind::Content {
                delta: "Hel".into(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "s1", "timestamp": 42, "type": "content", "delta": "Hel"})
        );
    }

    #[test]
    fn test_tool_call_delta_omits_missing_id() {
        let event = StreamEvent::new(
            "s1",
            EventKind::ToolCallDelta {
                index: 1,
                tool_call_id: None,
                name: None,
                arguments: "{}".into(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call_delta");
        assert_eq!(json["id"], "s1");
        assert!(json.get("tool_call_id").is_none());
        assert!(json.get("name").is_none());
    }

    #[test]
    fn test_parse_tool_result_event() {
        let raw = r#"{"id":"s","timestamp":1,"type":"tool_result","tool_call_id":"c1","content":"22C"}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind, EventKind::ToolResult(ToolResult::ok("c1", "22C")));
    }

    #[test]
    fn test_parse_done_with_usage() {
        let raw = r#"{"id":"s","timestamp":1,"type":"done","finish_reason":"tool_calls","usage":{"input_tokens":3,"output_tokens":4}}"#;
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            event.kind,
            EventKind::Done { finish_reason: FinishReason::ToolCalls, usage: Some(u) } if u.output_tokens == 4
        ));
    }

    #[test]
    fn test_error_event_conversion() {
        let err = LlmError::from_stream_error("overloaded", None);
        let event = StreamEvent::from_error("s", &err);
        assert!(matches!(
            &event.kind,
            EventKind::Error { message, code: Some(c) } if message == "overloaded" && c == "stream_error"
        ));
        let back = event.as_error().unwrap();
        assert_eq!(back.to_string(), err.to_string());
        assert!(StreamEvent::new("s", EventKind::ToolCallComplete { index: 0 }).as_error().is_none());
    }

    #[test]
    fn test_with_id_restamps() {
        let event = StreamEvent::new("inner", EventKind::Content { delta: "x".into() });
        let ts = event.timestamp;
        let event = event.with_id("outer");
        assert_eq!(event.id, "outer");
        assert_eq!(event.timestamp, ts);
    }

    #[tokio::test]
    async fn test_chat_stream_error_mid_stream() {
        let events = vec![
            Ok(StreamEvent::new("s", EventKind::Content { delta: "a".into() })),
            Err(LlmError::Http {
                status: Some(http::StatusCode::INTERNAL_SERVER_ERROR),
                message: "server error".into(),
                retryable: true,
            }),
        ];
        let stream: ChatStream = Box::pin(futures::stream::iter(events));
        let collected: Vec<_> = stream.collect().await;
        assert!(collected[0].is_ok());
        assert!(collected[1].is_err());
    }

    #[test]
    fn test_chat_stream_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ChatStream>();
    }
}
