//! # ai-stack
//!
//! Provider-agnostic streaming core for LLM applications.
//!
//! Adapters speak one normalized event vocabulary ([`StreamEvent`]). On top
//! of it this crate provides:
//!
//! - a [`StreamProcessor`](processor::StreamProcessor) that folds events
//!   into text, reasoning, and tool calls with pluggable
//!   [chunking](chunk) of UI updates,
//! - an agent loop ([`tool::agent_loop`]) that runs model turns, executes
//!   server tools, and pauses for approvals and client tools,
//! - a [`ChatClient`](client::ChatClient) that owns one conversation and
//!   publishes snapshots to subscribers,
//! - SSE [framing](sse) for moving events across a process boundary.
//!
//! Concrete providers live outside this crate and implement [`Provider`]
//! (or its object-safe counterpart [`DynProvider`]).
//!
//! # Architecture
//!
//! ```text
//!  adapter (Provider) ──▶ ChatStream ──▶ agent_loop ──▶ sse ──▶ network
//!                                            │                     │
//!                                      ToolRegistry          decode_sse
//!                                                                  │
//!                                                                  ▼
//!                              subscribers ◀── ChatClient ◀── StreamProcessor
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ai_stack::{ChatMessage, ChatParams, EventKind};
//! use ai_stack::tool::{AgentLoopConfig, ToolRegistry, agent_loop};
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(provider: Arc<dyn ai_stack::DynProvider>) {
//! let params = ChatParams {
//!     messages: vec![ChatMessage::user("Explain ownership in Rust")],
//!     ..Default::default()
//! };
//! let (mut stream, handle) = agent_loop(
//!     provider,
//!     Arc::new(ToolRegistry::new()),
//!     params.into(),
//!     AgentLoopConfig::default(),
//!     CancellationToken::new(),
//! );
//! while let Some(Ok(event)) = stream.next().await {
//!     if let EventKind::Content { delta } = event.kind {
//!         print!("{delta}");
//!     }
//! }
//! let result = handle.await;
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chat`] | Model-facing messages, tool calls, and responses |
//! | [`chunk`] | When buffered text is flushed to handlers |
//! | [`client`] | Conversation state machine and connection adapters |
//! | [`error`] | Unified [`LlmError`] |
//! | [`events`] | Optional lifecycle events for observability |
//! | [`message`] | UI-facing messages and conversion to model messages |
//! | [`partial_json`] | Best-effort parsing of incomplete JSON |
//! | [`processor`] | Folds a [`ChatStream`] into accumulated state |
//! | [`provider`] | The [`Provider`] trait and request parameters |
//! | [`sse`] | Server-sent-event encoding and decoding |
//! | [`stream`] | [`StreamEvent`] and the [`ChatStream`] alias |
//! | [`tool`] | Tool registry and the agent loop |
//! | [`usage`] | Token counts |

#![warn(missing_docs)]

pub mod chat;
pub mod chunk;
pub mod client;
pub mod error;
pub mod events;
pub mod message;
pub mod partial_json;
pub mod processor;
pub mod provider;
pub mod sse;
pub mod stream;
pub mod tool;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

// ── Core re-exports ────────────────────────────────────────────────
//
// Only the types nearly every program touches live at the root.
// Everything else stays in its submodule:
//
//   ai_stack::tool::*       : registry, agent loop, strategies
//   ai_stack::client::*     : ChatClient, connection adapters
//   ai_stack::processor::*  : StreamProcessor, StreamHandlers
//   ai_stack::chunk::*      : chunk strategies
//   ai_stack::sse::*        : SSE framing
//   ai_stack::mock::*       : MockProvider (test-utils feature)

pub use chat::{ChatMessage, ChatResponse, ChatRole, ContentBlock, ToolCall, ToolResult};
pub use error::LlmError;
pub use message::{MessagePart, UiMessage};
pub use provider::{
    ChatParams, DynProvider, JsonSchema, Provider, ProviderMetadata, ToolDefinition,
    ToolRetryConfig,
};
pub use stream::{ChatStream, EventKind, FinishReason, StreamEvent};
pub use usage::Usage;
