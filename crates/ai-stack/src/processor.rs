//! Stream processor: turns a raw event source into structured updates.
//!
//! [`StreamProcessor`] consumes a finite, single-pass sequence of
//! [`StreamEvent`]s one at a time. It accumulates text, reassembles tool
//! calls from per-index argument fragments, and reports progress through a
//! [`StreamHandlers`] implementation. It never mutates consumer state
//! directly; everything flows through the callbacks.
//!
//! # Callback order
//!
//! ```text
//!   content ─▶ chunk strategy ─▶ on_text_update(accumulated)
//!   tool_call_delta (new index) ─▶ flush text ─▶ on_tool_call_start
//!                                             ─▶ on_tool_call_state_change(awaiting-input)
//!   tool_call_delta ─▶ on_tool_call_delta ─▶ on_tool_call_state_change(input-streaming)
//!   tool_call_complete / done ─▶ on_tool_call_state_change(input-complete)
//!                             ─▶ on_tool_call_complete
//!   error ─▶ on_error ─▶ processing halts with Err
//!   source exhausted ─▶ on_stream_end(content, tool_calls)
//! ```
//!
//! # Example
//!
//! ```rust
//! use ai_stack::processor::{StreamHandlers, StreamProcessor};
//! use ai_stack::stream::{EventKind, StreamEvent};
//!
//! #[derive(Default)]
//! struct Collect(Vec<String>);
//!
//! impl StreamHandlers for Collect {
//!     fn on_text_update(&mut self, content: &str) {
//!         self.0.push(content.to_owned());
//!     }
//! }
//!
//! # async fn run() -> Result<(), ai_stack::LlmError> {
//! let events = ["Hello", " world"].map(|d| {
//!     Ok(StreamEvent::new("s", EventKind::Content { delta: d.into() }))
//! });
//! let mut processor = StreamProcessor::new(Collect::default());
//! let result = processor.process(futures::stream::iter(events)).await?;
//! assert_eq!(result.content, "Hello world");
//! assert_eq!(processor.handlers().0, ["Hello", "Hello world"]);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::chat::{ChatResponse, ToolCall, ToolResult};
use crate::chunk::{ChunkStrategy, ImmediateStrategy};
use crate::error::LlmError;
use crate::message::ToolCallState;
use crate::partial_json::parse_partial_json;
use crate::stream::{ApprovalRequest, ClientToolRequest, EventKind, FinishReason, StreamEvent};
use crate::usage::Usage;

/// Snapshot of one tool call, passed to
/// [`StreamHandlers::on_tool_call_state_change`].
#[derive(Debug, Clone, Copy)]
pub struct ToolCallUpdate<'a> {
    /// Stream index of the call.
    pub index: u32,
    /// Call id (empty until the adapter supplies one).
    pub id: &'a str,
    /// Tool name (empty until the adapter supplies one).
    pub name: &'a str,
    /// Current lifecycle state.
    pub state: ToolCallState,
    /// Raw argument buffer so far.
    pub arguments: &'a str,
    /// Best-effort parse of `arguments`.
    pub parsed: Option<&'a Value>,
}

/// Callbacks invoked by [`StreamProcessor`]. Every method defaults to a
/// no-op, so implementors only override what they need.
pub trait StreamHandlers: Send {
    /// Accumulated text should be shown.
    fn on_text_update(&mut self, _content: &str) {}

    /// Accumulated reasoning text changed.
    fn on_thinking_update(&mut self, _content: &str) {}

    /// First fragment for a new index arrived.
    fn on_tool_call_start(&mut self, _index: u32, _id: &str, _name: &str) {}

    /// An argument fragment was appended.
    fn on_tool_call_delta(&mut self, _index: u32, _fragment: &str) {}

    /// A tool call was created, grew, or completed.
    fn on_tool_call_state_change(&mut self, _update: &ToolCallUpdate<'_>) {}

    /// A tool call is final. `arguments` is the full concatenated buffer.
    fn on_tool_call_complete(&mut self, _index: u32, _id: &str, _name: &str, _arguments: &str) {}

    /// A server-side tool produced a result.
    fn on_tool_result(&mut self, _result: &ToolResult) {}

    /// A tool call is waiting for approval.
    fn on_approval_requested(&mut self, _request: &ApprovalRequest) {}

    /// A client-side tool should run.
    fn on_tool_input_available(&mut self, _request: &ClientToolRequest) {}

    /// The source is exhausted. `tool_calls` is `None` when no call occurred.
    fn on_stream_end(&mut self, _content: &str, _tool_calls: Option<&[ToolCall]>) {}

    /// Processing failed. Receives whatever was accumulated so far.
    fn on_error(&mut self, _error: &LlmError, _content: &str, _tool_calls: &[ToolCall]) {}
}

impl StreamHandlers for () {}

/// Final output of one processed source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessorResult {
    /// Concatenation of every text delta, in order.
    pub content: String,
    /// Concatenation of every reasoning delta.
    pub thinking: String,
    /// Finalized tool calls, or `None` when no call occurred.
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The last reported finish reason.
    pub finish_reason: Option<FinishReason>,
    /// Usage summed over every `done` event.
    pub usage: Usage,
}

impl ProcessorResult {
    /// Converts into a [`ChatResponse`].
    pub fn into_response(self) -> ChatResponse {
        ChatResponse {
            content: self.content,
            tool_calls: self.tool_calls.unwrap_or_default(),
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: String,
    name: String,
    arguments: String,
    parsed: Option<Value>,
}

/// Consumes stream events and reports structured updates.
///
/// One processor handles one source at a time. Call
/// [`reset`](Self::reset) before reusing it.
pub struct StreamProcessor<H: StreamHandlers> {
    strategy: Box<dyn ChunkStrategy>,
    handlers: H,
    text: String,
    emitted_len: usize,
    thinking: String,
    active: BTreeMap<u32, ToolCallBuffer>,
    turn_completed: Vec<(u32, ToolCall)>,
    completed: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl<H: StreamHandlers> std::fmt::Debug for StreamProcessor<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("text_len", &self.text.len())
            .field("active_tool_calls", &self.active.len())
            .field("completed_tool_calls", &self.completed.len())
            .field("finish_reason", &self.finish_reason)
            .finish_non_exhaustive()
    }
}

impl<H: StreamHandlers> StreamProcessor<H> {
    /// Creates a processor that emits text on every delta.
    pub fn new(handlers: H) -> Self {
        Self::with_strategy(handlers, Box::new(ImmediateStrategy))
    }

    /// Creates a processor with a custom chunk strategy.
    pub fn with_strategy(handlers: H, strategy: Box<dyn ChunkStrategy>) -> Self {
        Self {
            strategy,
            handlers,
            text: String::new(),
            emitted_len: 0,
            thinking: String::new(),
            active: BTreeMap::new(),
            turn_completed: Vec::new(),
            completed: Vec::new(),
            finish_reason: None,
            usage: Usage::default(),
        }
    }

    /// Consumes `source` to exhaustion and returns the final result.
    ///
    /// Stops at the first `error` event or `Err` item, after invoking
    /// [`StreamHandlers::on_error`]; no further items are read.
    pub async fn process<S>(&mut self, source: S) -> Result<ProcessorResult, LlmError>
    where
        S: Stream<Item = Result<StreamEvent, LlmError>>,
    {
        let mut source = std::pin::pin!(source);
        while let Some(item) = source.next().await {
            match item {
                Ok(event) => self.process_event(&event)?,
                Err(err) => return Err(self.fail(err)),
            }
        }
        Ok(self.finish())
    }

    /// Applies one event. Returns `Err` for `error` events, after
    /// invoking [`StreamHandlers::on_error`].
    pub fn process_event(&mut self, event: &StreamEvent) -> Result<(), LlmError> {
        match &event.kind {
            EventKind::Content { delta } => self.handle_text(delta),
            EventKind::Thinking { delta } => {
                self.thinking.push_str(delta);
                self.handlers.on_thinking_update(&self.thinking);
            }
            EventKind::ToolCallDelta {
                index,
                tool_call_id,
                name,
                arguments,
            } => self.handle_tool_delta(*index, tool_call_id.as_deref(), name.as_deref(), arguments),
            EventKind::ToolCallComplete { index } => self.finalize_call(*index),
            EventKind::ToolResult(result) => self.handlers.on_tool_result(result),
            EventKind::ApprovalRequested(request) => self.handlers.on_approval_requested(request),
            EventKind::ToolInputAvailable(request) => {
                self.handlers.on_tool_input_available(request);
            }
            EventKind::Error { message, code } => {
                let err = LlmError::from_stream_error(message.clone(), code.clone());
                return Err(self.fail(err));
            }
            EventKind::Done {
                finish_reason,
                usage,
            } => {
                self.end_turn();
                self.finish_reason = Some(*finish_reason);
                if let Some(usage) = usage {
                    self.usage += usage;
                }
            }
        }
        Ok(())
    }

    /// Marks the source exhausted: finalizes in-flight calls, flushes
    /// held-back text, and invokes [`StreamHandlers::on_stream_end`].
    pub fn finish(&mut self) -> ProcessorResult {
        self.end_turn();
        let tool_calls = (!self.completed.is_empty()).then(|| self.completed.clone());
        self.handlers
            .on_stream_end(&self.text, tool_calls.as_deref());
        ProcessorResult {
            content: self.text.clone(),
            thinking: self.thinking.clone(),
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }

    /// Clears all accumulated state and resets the chunk strategy.
    pub fn reset(&mut self) {
        self.strategy.reset();
        self.text.clear();
        self.emitted_len = 0;
        self.thinking.clear();
        self.active.clear();
        self.turn_completed.clear();
        self.completed.clear();
        self.finish_reason = None;
        self.usage = Usage::default();
    }

    /// Accumulated text so far.
    pub fn content(&self) -> &str {
        &self.text
    }

    /// Tool calls finalized so far.
    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.completed
    }

    /// Shared access to the handlers.
    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Exclusive access to the handlers.
    pub fn handlers_mut(&mut self) -> &mut H {
        &mut self.handlers
    }

    /// Consumes the processor, returning its handlers.
    pub fn into_handlers(self) -> H {
        self.handlers
    }

    // ── internals ───────────────────────────────────────────────────

    fn handle_text(&mut self, delta: &str) {
        self.text.push_str(delta);
        if self.strategy.should_emit(delta, &self.text) {
            self.emit_text();
        }
    }

    fn emit_text(&mut self) {
        self.emitted_len = self.text.len();
        self.handlers.on_text_update(&self.text);
    }

    fn flush_text(&mut self) {
        if self.text.len() > self.emitted_len {
            self.emit_text();
        }
    }

    fn handle_tool_delta(&mut self, index: u32, id: Option<&str>, name: Option<&str>, fragment: &str) {
        if !self.active.contains_key(&index) {
            self.flush_text();
            let buffer = ToolCallBuffer {
                id: id.unwrap_or_default().to_owned(),
                name: name.unwrap_or_default().to_owned(),
                ..ToolCallBuffer::default()
            };
            self.handlers
                .on_tool_call_start(index, &buffer.id, &buffer.name);
            self.handlers.on_tool_call_state_change(&ToolCallUpdate {
                index,
                id: &buffer.id,
                name: &buffer.name,
                state: ToolCallState::AwaitingInput,
                arguments: "",
                parsed: None,
            });
            self.active.insert(index, buffer);
        }

        let Some(buffer) = self.active.get_mut(&index) else {
            return;
        };
        // id and name are fixed by the first fragment that carries them.
        if buffer.id.is_empty() {
            if let Some(id) = id {
                id.clone_into(&mut buffer.id);
            }
        }
        if buffer.name.is_empty() {
            if let Some(name) = name {
                name.clone_into(&mut buffer.name);
            }
        }
        if fragment.is_empty() {
            return;
        }
        buffer.arguments.push_str(fragment);
        buffer.parsed = parse_partial_json(&buffer.arguments);

        self.handlers.on_tool_call_delta(index, fragment);
        self.handlers.on_tool_call_state_change(&ToolCallUpdate {
            index,
            id: &buffer.id,
            name: &buffer.name,
            state: ToolCallState::InputStreaming,
            arguments: &buffer.arguments,
            parsed: buffer.parsed.as_ref(),
        });
    }

    fn finalize_call(&mut self, index: u32) {
        let Some(mut buffer) = self.active.remove(&index) else {
            return;
        };
        buffer.parsed = parse_partial_json(&buffer.arguments);
        self.handlers.on_tool_call_state_change(&ToolCallUpdate {
            index,
            id: &buffer.id,
            name: &buffer.name,
            state: ToolCallState::InputComplete,
            arguments: &buffer.arguments,
            parsed: buffer.parsed.as_ref(),
        });
        self.handlers
            .on_tool_call_complete(index, &buffer.id, &buffer.name, &buffer.arguments);
        self.turn_completed.push((
            index,
            ToolCall {
                id: buffer.id,
                name: buffer.name,
                arguments: buffer.arguments,
            },
        ));
    }

    /// Finalizes every in-flight call in ascending index order and moves
    /// the turn's calls to the completed list.
    fn end_turn(&mut self) {
        let indices: Vec<u32> = self.active.keys().copied().collect();
        for index in indices {
            self.finalize_call(index);
        }
        self.turn_completed.sort_by_key(|(index, _)| *index);
        self.completed
            .extend(self.turn_completed.drain(..).map(|(_, call)| call));
        self.flush_text();
    }

    fn fail(&mut self, err: LlmError) -> LlmError {
        let mut calls = self.completed.clone();
        calls.extend(self.turn_completed.iter().map(|(_, c)| c.clone()));
        calls.extend(self.active.values().map(|b| ToolCall {
            id: b.id.clone(),
            name: b.name.clone(),
            arguments: b.arguments.clone(),
        }));
        self.handlers.on_error(&err, &self.text, &calls);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{BatchStrategy, WordBoundaryStrategy};
    use crate::test_helpers::{content, done, error_event, tool_delta, tool_start};

    #[derive(Debug, Default)]
    struct Recorder {
        text_updates: Vec<String>,
        starts: Vec<(u32, String, String)>,
        deltas: Vec<(u32, String)>,
        states: Vec<(u32, ToolCallState, Option<Value>)>,
        completes: Vec<(u32, String, String, String)>,
        stream_end: Option<(String, Option<Vec<ToolCall>>)>,
        errors: Vec<(String, String, usize)>,
    }

    impl StreamHandlers for Recorder {
        fn on_text_update(&mut self, content: &str) {
            self.text_updates.push(content.to_owned());
        }
        fn on_tool_call_start(&mut self, index: u32, id: &str, name: &str) {
            self.starts.push((index, id.into(), name.into()));
        }
        fn on_tool_call_delta(&mut self, index: u32, fragment: &str) {
            self.deltas.push((index, fragment.into()));
        }
        fn on_tool_call_state_change(&mut self, update: &ToolCallUpdate<'_>) {
            self.states
                .push((update.index, update.state, update.parsed.cloned()));
        }
        fn on_tool_call_complete(&mut self, index: u32, id: &str, name: &str, arguments: &str) {
            self.completes
                .push((index, id.into(), name.into(), arguments.into()));
        }
        fn on_stream_end(&mut self, content: &str, tool_calls: Option<&[ToolCall]>) {
            self.stream_end = Some((content.into(), tool_calls.map(<[ToolCall]>::to_vec)));
        }
        fn on_error(&mut self, error: &LlmError, content: &str, tool_calls: &[ToolCall]) {
            self.errors
                .push((error.to_string(), content.into(), tool_calls.len()));
        }
    }

    fn ok_stream(events: Vec<StreamEvent>) -> impl Stream<Item = Result<StreamEvent, LlmError>> {
        futures::stream::iter(events.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_text_only_immediate() {
        let mut p = StreamProcessor::new(Recorder::default());
        let result = p
            .process(ok_stream(vec![content("Hello"), content(" world")]))
            .await
            .unwrap();
        assert_eq!(result.content, "Hello world");
        assert!(result.tool_calls.is_none());
        let rec = p.into_handlers();
        assert_eq!(rec.text_updates, ["Hello", "Hello world"]);
        assert_eq!(rec.stream_end, Some(("Hello world".into(), None)));
    }

    #[tokio::test]
    async fn test_text_updates_are_growing_prefixes() {
        let deltas = ["The ", "quick", " brown ", "fox", "."];
        let events = deltas.iter().map(|d| content(d)).collect();
        let mut p = StreamProcessor::with_strategy(
            Recorder::default(),
            Box::new(WordBoundaryStrategy),
        );
        let result = p.process(ok_stream(events)).await.unwrap();
        assert_eq!(result.content, deltas.concat());
        let rec = p.into_handlers();
        assert_eq!(rec.text_updates.last().map(String::as_str), Some("The quick brown fox."));
        for pair in rec.text_updates.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
    }

    #[tokio::test]
    async fn test_batch_strategy_holds_back_then_flushes_at_end() {
        let mut p = StreamProcessor::with_strategy(Recorder::default(), Box::new(BatchStrategy::new(2)));
        p.process(ok_stream(vec![content("a"), content("b"), content("c")]))
            .await
            .unwrap();
        assert_eq!(p.handlers().text_updates, ["ab", "abc"]);
    }

    #[tokio::test]
    async fn test_interleaved_parallel_tool_calls() {
        let events = vec![
            tool_start(0, "call_0", "get_weather", r#"{"lo"#),
            tool_start(1, "call_1", "get_time", r#"{"ci"#),
            tool_delta(0, r#"cation":"Paris"}"#),
            tool_delta(1, r#"ty":"Tokyo"}"#),
            done(FinishReason::ToolCalls),
        ];
        let mut p = StreamProcessor::new(Recorder::default());
        let result = p.process(ok_stream(events)).await.unwrap();

        let rec = p.handlers();
        assert_eq!(
            rec.completes,
            vec![
                (0, "call_0".into(), "get_weather".into(), r#"{"location":"Paris"}"#.into()),
                (1, "call_1".into(), "get_time".into(), r#"{"city":"Tokyo"}"#.into()),
            ]
        );
        let calls = result.tool_calls.unwrap();
        assert_eq!(calls[0].arguments, r#"{"location":"Paris"}"#);
        assert_eq!(calls[1].arguments, r#"{"city":"Tokyo"}"#);
        assert_eq!(result.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn test_tool_call_states_and_partial_parse() {
        let events = vec![
            tool_start(0, "c1", "search", ""),
            tool_delta(0, r#"{"q":"ru"#),
            tool_delta(0, r#"st"}"#),
        ];
        let mut p = StreamProcessor::new(Recorder::default());
        p.process(ok_stream(events)).await.unwrap();
        let rec = p.handlers();
        let states: Vec<ToolCallState> = rec.states.iter().map(|s| s.1).collect();
        assert_eq!(
            states,
            [
                ToolCallState::AwaitingInput,
                ToolCallState::InputStreaming,
                ToolCallState::InputStreaming,
                ToolCallState::InputComplete,
            ]
        );
        assert_eq!(rec.states[1].2, Some(serde_json::json!({"q": "ru"})));
        assert_eq!(rec.states[3].2, Some(serde_json::json!({"q": "rust"})));
        assert_eq!(rec.deltas.len(), 2);
    }

    #[tokio::test]
    async fn test_explicit_complete_event_finalizes_one_call() {
        let events = vec![
            tool_start(0, "a", "t", "{}"),
            tool_start(1, "b", "t", "{}"),
            StreamEvent::new("s", EventKind::ToolCallComplete { index: 1 }),
        ];
        let mut p = StreamProcessor::new(Recorder::default());
        for e in &events {
            p.process_event(e).unwrap();
        }
        assert_eq!(p.handlers().completes.len(), 1);
        assert_eq!(p.handlers().completes[0].1, "b");
        let result = p.finish();
        // Calls within a turn are reported in index order.
        let ids: Vec<String> = result.tool_calls.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_text_flushed_before_tool_call_start() {
        let mut p = StreamProcessor::with_strategy(
            Recorder::default(),
            Box::new(BatchStrategy::new(100)),
        );
        p.process(ok_stream(vec![
            content("Let me check"),
            tool_start(0, "c1", "t", "{}"),
        ]))
        .await
        .unwrap();
        assert_eq!(p.handlers().text_updates, ["Let me check"]);
    }

    #[tokio::test]
    async fn test_error_event_halts_and_reports_partial_state() {
        let events = vec![
            Ok(content("partial")),
            Ok(tool_start(0, "c1", "t", r#"{"a"#)),
            Ok(error_event("model crashed")),
            Ok(content("never seen")),
        ];
        let mut p = StreamProcessor::new(Recorder::default());
        let err = p.process(futures::stream::iter(events)).await.unwrap_err();
        assert!(matches!(err, LlmError::Provider { ref code, .. } if code == "stream_error"));
        let rec = p.handlers();
        assert_eq!(rec.errors.len(), 1);
        assert_eq!(rec.errors[0].1, "partial");
        assert_eq!(rec.errors[0].2, 1);
        assert!(rec.stream_end.is_none());
        assert_eq!(p.content(), "partial");
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let events = vec![
            Ok(content("x")),
            Err(LlmError::Timeout { elapsed_ms: 5 }),
        ];
        let mut p = StreamProcessor::new(Recorder::default());
        let err = p.process(futures::stream::iter(events)).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout { .. }));
        assert_eq!(p.handlers().errors.len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_turns_reuse_indices() {
        let events = vec![
            tool_start(0, "first", "t", "{}"),
            done(FinishReason::ToolCalls),
            tool_start(0, "second", "t", "{}"),
            done(FinishReason::Stop),
        ];
        let mut p = StreamProcessor::new(());
        let result = p.process(ok_stream(events)).await.unwrap();
        let ids: Vec<String> = result.tool_calls.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["first", "second"]);
        assert_eq!(result.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_usage_summed_and_reset() {
        let usage = Usage {
            input_tokens: 10,
            output_tokens: 5,
        };
        let done_with_usage = || {
            StreamEvent::new(
                "s",
                EventKind::Done {
                    finish_reason: FinishReason::Stop,
                    usage: Some(usage),
                },
            )
        };
        let mut p = StreamProcessor::new(());
        let result = p
            .process(ok_stream(vec![done_with_usage(), done_with_usage()]))
            .await
            .unwrap();
        assert_eq!(result.usage.input_tokens, 20);

        p.reset();
        assert_eq!(p.content(), "");
        assert!(p.tool_calls().is_empty());
    }

    #[tokio::test]
    async fn test_id_filled_by_later_fragment() {
        let events = vec![
            tool_delta(0, ""),
            StreamEvent::new(
                "s",
                EventKind::ToolCallDelta {
                    index: 0,
                    tool_call_id: Some("late".into()),
                    name: Some("lookup".into()),
                    arguments: "{}".into(),
                },
            ),
        ];
        let mut p = StreamProcessor::new(());
        let result = p.process(ok_stream(events)).await.unwrap();
        let calls = result.tool_calls.unwrap();
        assert_eq!(calls[0].id, "late");
        assert_eq!(calls[0].name, "lookup");
    }
}
