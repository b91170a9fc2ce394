//! Server side: serve a [`ChatStream`] as an SSE response.
//!
//! The body is a stream of `Result<String, Infallible>` records, which
//! every common server framework accepts as a streaming body (`String`
//! converts into `Bytes`).

use std::convert::Infallible;
use std::pin::Pin;

use ai_stack::sse::to_sse_stream;
use ai_stack::stream::ChatStream;
use futures::{Stream, StreamExt};
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Response, StatusCode};

/// A streaming SSE body.
pub type SseBody = Pin<Box<dyn Stream<Item = Result<String, Infallible>> + Send>>;

/// Headers for an SSE response.
pub fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    // Stops nginx from buffering the stream.
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers
}

/// Frames `events` as SSE records, ending with `[DONE]`.
pub fn sse_body(events: ChatStream) -> SseBody {
    Box::pin(to_sse_stream(events).map(Ok))
}

/// A `200 OK` response with [`sse_headers`] and an [`sse_body`].
///
/// ```rust
/// use ai_stack::ChatStream;
/// use ai_stack_http::sse_response;
///
/// let events: ChatStream = Box::pin(futures::stream::empty::<
///     Result<ai_stack::StreamEvent, ai_stack::LlmError>,
/// >());
/// let response = sse_response(events);
/// assert_eq!(response.headers()["content-type"], "text/event-stream");
/// ```
pub fn sse_response(events: ChatStream) -> Response<SseBody> {
    let mut response = Response::new(sse_body(events));
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = sse_headers();
    response
}
