//! Builders and collectors for tests.
//!
//! Available with the `test-utils` feature so downstream crates can reuse
//! them, and always compiled for this crate's own tests.

use futures::StreamExt;

use crate::error::LlmError;
use crate::mock::MockProvider;
use crate::provider::ProviderMetadata;
use crate::stream::{ChatStream, EventKind, FinishReason, StreamEvent};
use crate::usage::Usage;

/// Stream id used by every builder in this module.
pub const TEST_STREAM_ID: &str = "test-stream";

fn event(kind: EventKind) -> StreamEvent {
    StreamEvent::new(TEST_STREAM_ID, kind)
}

/// A `content` event.
pub fn content(delta: &str) -> StreamEvent {
    event(EventKind::Content {
        delta: delta.into(),
    })
}

/// A `thinking` event.
pub fn thinking(delta: &str) -> StreamEvent {
    event(EventKind::Thinking {
        delta: delta.into(),
    })
}

/// The first fragment of a tool call, carrying its id and name.
pub fn tool_start(index: u32, id: &str, name: &str, arguments: &str) -> StreamEvent {
    event(EventKind::ToolCallDelta {
        index,
        tool_call_id: Some(id.into()),
        name: Some(name.into()),
        arguments: arguments.into(),
    })
}

/// A follow-up argument fragment.
pub fn tool_delta(index: u32, arguments: &str) -> StreamEvent {
    event(EventKind::ToolCallDelta {
        index,
        tool_call_id: None,
        name: None,
        arguments: arguments.into(),
    })
}

/// A `tool_call_complete` event.
pub fn tool_complete(index: u32) -> StreamEvent {
    event(EventKind::ToolCallComplete { index })
}

/// A `done` event without usage.
pub fn done(finish_reason: FinishReason) -> StreamEvent {
    event(EventKind::Done {
        finish_reason,
        usage: None,
    })
}

/// A `done` event with usage.
pub fn done_with_usage(finish_reason: FinishReason, input_tokens: u64, output_tokens: u64) -> StreamEvent {
    event(EventKind::Done {
        finish_reason,
        usage: Some(Usage {
            input_tokens,
            output_tokens,
        }),
    })
}

/// An `error` event with no code.
pub fn error_event(message: &str) -> StreamEvent {
    event(EventKind::Error {
        message: message.into(),
        code: None,
    })
}

/// A complete text-only turn ending in `stop`.
pub fn text_turn(text: &str) -> Vec<StreamEvent> {
    vec![content(text), done(FinishReason::Stop)]
}

/// A turn requesting the given `(id, name, arguments)` calls, ending in
/// `tool_calls`.
pub fn tool_turn(calls: &[(&str, &str, &str)]) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = calls
        .iter()
        .zip(0u32..)
        .map(|(&(id, name, args), index)| tool_start(index, id, name, args))
        .collect();
    events.push(done(FinishReason::ToolCalls));
    events
}

/// Collects every item, errors included.
pub async fn collect_stream_results(stream: ChatStream) -> Vec<Result<StreamEvent, LlmError>> {
    stream.collect::<Vec<_>>().await
}

/// Collects every event, panicking on an error item.
pub async fn collect_stream(stream: ChatStream) -> Vec<StreamEvent> {
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .map(|r| r.expect("stream event should be Ok"))
        .collect()
}

/// Creates a [`MockProvider`] with the given name and model.
pub fn mock_for(provider_name: &str, model: &str) -> MockProvider {
    MockProvider::new(ProviderMetadata {
        name: provider_name.to_owned().into(),
        model: model.into(),
    })
}
