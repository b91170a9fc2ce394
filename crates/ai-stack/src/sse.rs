//! Server-sent-event framing for stream events.
//!
//! Each [`StreamEvent`] travels as one `data: <json>\n\n` record, and a
//! terminal `data: [DONE]\n\n` record ends the transmission.
//!
//! - [`encode_event`] and [`to_sse_stream`] are the server side.
//! - [`SseDecoder`] and [`decode_sse`] are the client side. The decoder is
//!   incremental: it accepts arbitrary byte chunks, including ones that
//!   split a UTF-8 sequence or a line ending. Records that fail to parse
//!   are logged and skipped.

use futures::{Stream, StreamExt};
use tracing::warn;

use crate::error::LlmError;
use crate::stream::{ChatStream, StreamEvent};

/// Terminal record.
pub const DONE_RECORD: &str = "data: [DONE]\n\n";

const DONE_SENTINEL: &str = "[DONE]";

/// Upper bound on buffered, not-yet-dispatched input.
const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

/// Encodes one event as a `data:` record.
pub fn encode_event(event: &StreamEvent) -> Result<String, LlmError> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// Encodes `err` as an `error` record for stream `id`.
pub fn encode_error(id: &str, err: &LlmError) -> Result<String, LlmError> {
    encode_event(&StreamEvent::from_error(id, err))
}

/// Converts an event stream into SSE records.
///
/// Every event becomes one record. An `Err` item becomes an `error`
/// record and ends the stream. `[DONE]` is always the last record.
pub fn to_sse_stream(events: ChatStream) -> impl Stream<Item = String> + Send + 'static {
    futures::stream::unfold(Some((events, String::new())), |state| async move {
        let (mut events, mut last_id) = state?;
        match events.next().await {
            Some(Ok(event)) => {
                last_id.clone_from(&event.id);
                let records = match encode_event(&event) {
                    Ok(record) => vec![record],
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable stream event");
                        Vec::new()
                    }
                };
                Some((records, Some((events, last_id))))
            }
            Some(Err(err)) => {
                let mut records = Vec::with_capacity(2);
                match encode_error(&last_id, &err) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(error = %e, "dropping unencodable error event"),
                }
                records.push(DONE_RECORD.to_owned());
                Some((records, None))
            }
            None => Some((vec![DONE_RECORD.to_owned()], None)),
        }
    })
    .flat_map(futures::stream::iter)
}

/// Incremental SSE decoder.
///
/// ```rust
/// use ai_stack::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let events = decoder
///     .push(b"data: {\"id\":\"s\",\"timestamp\":1,\"type\":\"content\",\"delta\":\"hi\"}\n\ndata: [DO")
///     .unwrap();
/// assert_eq!(events.len(), 1);
/// assert!(decoder.push(b"NE]\n\n").unwrap().is_empty());
/// assert!(decoder.is_done());
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    text: String,
    pending_bytes: Vec<u8>,
    data_lines: Vec<String>,
    done: bool,
}

impl SseDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` sentinel has been seen. Input after it is
    /// ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds a chunk and returns every event it completed.
    ///
    /// Fails only when buffered input exceeds 16 MiB.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, LlmError> {
        if self.done {
            return Ok(Vec::new());
        }
        self.pending_bytes.extend_from_slice(bytes);
        if self.pending_bytes.len() > MAX_BUF || self.text.len() > MAX_BUF {
            self.pending_bytes.clear();
            self.text.clear();
            return Err(LlmError::ResponseFormat {
                message: "SSE stream buffer exceeded 16 MiB".into(),
                raw: String::new(),
            });
        }
        self.decode_utf8();

        let mut events = Vec::new();
        while let Some(pos) = self.text.find('\n') {
            let line: String = self.text.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            self.handle_line(line, &mut events);
            if self.done {
                self.text.clear();
                break;
            }
        }
        Ok(events)
    }

    /// Dispatches a trailing record that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        let rest = std::mem::take(&mut self.text);
        let rest = rest.trim_end_matches('\r');
        if !rest.is_empty() {
            self.handle_line(rest, &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    /// Moves valid UTF-8 from `pending_bytes` into `text`, keeping an
    /// incomplete trailing sequence for the next chunk and dropping
    /// invalid bytes.
    fn decode_utf8(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(text) => {
                    self.text.push_str(text);
                    self.pending_bytes.clear();
                    return;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    if let Ok(valid) = std::str::from_utf8(&self.pending_bytes[..valid_up_to]) {
                        self.text.push_str(valid);
                    }
                    match e.error_len() {
                        Some(invalid) => {
                            self.pending_bytes.drain(..valid_up_to + invalid);
                        }
                        None => {
                            self.pending_bytes.drain(..valid_up_to);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        // `event`, `id`, and `retry` carry nothing the envelope lacks.
        if field == "data" {
            self.data_lines.push(value.to_owned());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<StreamEvent>) {
        if self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        if data.trim() == DONE_SENTINEL {
            self.done = true;
            return;
        }
        match serde_json::from_str::<StreamEvent>(&data) {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, data = %data, "skipping malformed SSE record"),
        }
    }
}

/// Decodes an SSE byte stream into a [`ChatStream`].
///
/// Transport errors become retryable [`LlmError::Http`] items. The
/// stream ends after `[DONE]` or when the source ends.
pub fn decode_sse<S, B, E>(bytes: S) -> ChatStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + 'static,
    E: std::fmt::Display + 'static,
{
    let stream = bytes
        .map(Some)
        .chain(futures::stream::once(async { None }))
        .scan(SseDecoder::new(), |decoder, chunk| {
            let result: Option<Vec<Result<StreamEvent, LlmError>>> = if decoder.is_done() {
                None
            } else {
                Some(match chunk {
                    Some(Ok(bytes)) => match decoder.push(bytes.as_ref()) {
                        Ok(events) => events.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    },
                    Some(Err(e)) => vec![Err(LlmError::Http {
                        status: None,
                        message: format!("Stream read error: {e}"),
                        retryable: true,
                    })],
                    None => decoder.finish().into_iter().map(Ok).collect(),
                })
            };
            futures::future::ready(result)
        })
        .flat_map(futures::stream::iter);

    Box::pin(stream)
}
