//! HTTP transport for [`ai-stack`](ai_stack).
//!
//! Two halves of the same wire format:
//!
//! - [`SseConnection`] is a [`ConnectionAdapter`](ai_stack::client::ConnectionAdapter)
//!   for [`ChatClient`](ai_stack::client::ChatClient). It POSTs
//!   `{ messages, data, conversationId }` as JSON and decodes the SSE
//!   response into stream events.
//! - [`sse_response`] turns a server-side [`ChatStream`](ai_stack::ChatStream),
//!   typically from [`agent_loop`](ai_stack::tool::agent_loop), into an
//!   HTTP response with one `data:` record per event and a final
//!   `data: [DONE]`.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ai_stack::client::{ChatClient, ChatClientOptions};
//! use ai_stack_http::{HttpConnectionConfig, SseConnection};
//!
//! # async fn example() -> Result<(), ai_stack::LlmError> {
//! let connection = SseConnection::new(HttpConnectionConfig {
//!     url: "http://localhost:3000/api/chat".into(),
//!     ..Default::default()
//! })?;
//! let client = ChatClient::new(Arc::new(connection), ChatClientOptions::default());
//! if let Err(e) = client.send_message("Hello!").await {
//!     eprintln!("chat failed: {e}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod connection;
mod response;

pub use config::HttpConnectionConfig;
pub use connection::SseConnection;
pub use response::{SseBody, sse_body, sse_headers, sse_response};
