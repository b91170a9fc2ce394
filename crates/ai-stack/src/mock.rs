//! Mock model adapter for tests.
//!
//! [`MockProvider`] is a queue-based fake. Each call to
//! [`stream`](Provider::stream) pops the next scripted turn: a list of
//! events, an error raised before any event, an error raised part-way
//! through, or a stream that never finishes (for cancellation and timeout
//! tests). Every call records its [`ChatParams`].
//!
//! ```rust,no_run
//! use ai_stack::mock::MockProvider;
//! use ai_stack::test_helpers::{mock_for, text_turn};
//! use ai_stack::{ChatParams, Provider};
//!
//! # async fn example() {
//! let mock = mock_for("test", "test-model");
//! mock.queue_stream(text_turn("Hello!"));
//!
//! let resp = mock.generate(&ChatParams::default()).await.unwrap();
//! assert_eq!(resp.content, "Hello!");
//! assert_eq!(mock.recorded_calls().len(), 1);
//! # }
//! ```
//!
//! [`LlmError`] holds a boxed source and is not `Clone`, so queued errors
//! use the cloneable [`MockError`] mirror and convert at dequeue time.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;

use crate::error::LlmError;
use crate::provider::{ChatParams, Provider, ProviderMetadata};
use crate::stream::{ChatStream, StreamEvent};

enum MockTurn {
    Events(Vec<StreamEvent>),
    Fail(MockError),
    FailMidStream(Vec<StreamEvent>, MockError),
    Hang(Vec<StreamEvent>),
}

/// A queue-based mock adapter.
///
/// An empty queue yields [`LlmError::InvalidRequest`] rather than
/// panicking, so a loop that calls the model too often fails visibly.
pub struct MockProvider {
    turns: Mutex<VecDeque<MockTurn>>,
    meta: ProviderMetadata,
    calls: Arc<Mutex<Vec<ChatParams>>>,
}

/// Cloneable subset of [`LlmError`] for queuing.
#[derive(Debug, Clone)]
pub enum MockError {
    /// Maps to [`LlmError::Http`].
    Http {
        /// HTTP status code, if any.
        status: Option<http::StatusCode>,
        /// Error message.
        message: String,
        /// Whether the error is retryable.
        retryable: bool,
    },
    /// Maps to [`LlmError::Auth`].
    Auth(String),
    /// Maps to [`LlmError::InvalidRequest`].
    InvalidRequest(String),
    /// Maps to [`LlmError::Provider`].
    Provider {
        /// Provider error code.
        code: String,
        /// Error message.
        message: String,
        /// Whether the error is retryable.
        retryable: bool,
    },
    /// Maps to [`LlmError::Timeout`].
    Timeout {
        /// Elapsed milliseconds.
        elapsed_ms: u64,
    },
}

impl MockError {
    fn into_llm_error(self) -> LlmError {
        match self {
            Self::Http {
                status,
                message,
                retryable,
            } => LlmError::Http {
                status,
                message,
                retryable,
            },
            Self::Auth(msg) => LlmError::Auth(msg),
            Self::InvalidRequest(msg) => LlmError::InvalidRequest(msg),
            Self::Provider {
                code,
                message,
                retryable,
            } => LlmError::Provider {
                code,
                message,
                retryable,
            },
            Self::Timeout { elapsed_ms } => LlmError::Timeout { elapsed_ms },
        }
    }
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("meta", &self.meta)
            .field("queued_turns", &self.lock_turns().len())
            .field(
                "recorded_calls",
                &self.calls.lock().unwrap_or_else(PoisonError::into_inner).len(),
            )
            .finish()
    }
}

impl MockProvider {
    /// Creates a mock with empty queues.
    pub fn new(meta: ProviderMetadata) -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            meta,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock_turns(&self) -> std::sync::MutexGuard<'_, VecDeque<MockTurn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, turn: MockTurn) -> &Self {
        self.lock_turns().push_back(turn);
        self
    }

    /// Enqueues events for the next `stream` call.
    pub fn queue_stream(&self, events: Vec<StreamEvent>) -> &Self {
        self.push(MockTurn::Events(events))
    }

    /// Enqueues an error returned by `stream` itself, before any event.
    pub fn queue_stream_error(&self, error: MockError) -> &Self {
        self.push(MockTurn::Fail(error))
    }

    /// Enqueues events followed by an `Err` item.
    pub fn queue_stream_then_error(&self, events: Vec<StreamEvent>, error: MockError) -> &Self {
        self.push(MockTurn::FailMidStream(events, error))
    }

    /// Enqueues events followed by a stream that never yields again.
    pub fn queue_hanging_stream(&self, events: Vec<StreamEvent>) -> &Self {
        self.push(MockTurn::Hang(events))
    }

    /// Number of turns not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock_turns().len()
    }

    /// Every `ChatParams` passed to `stream`, in call order.
    pub fn recorded_calls(&self) -> Vec<ChatParams> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Provider for MockProvider {
    async fn stream(&self, params: &ChatParams) -> Result<ChatStream, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(params.clone());
        let turn = self.lock_turns().pop_front().ok_or_else(|| {
            LlmError::InvalidRequest("MockProvider: no queued stream responses remaining".into())
        })?;

        let stream: ChatStream = match turn {
            MockTurn::Events(events) => Box::pin(futures::stream::iter(events.into_iter().map(Ok))),
            MockTurn::Fail(error) => return Err(error.into_llm_error()),
            MockTurn::FailMidStream(events, error) => Box::pin(
                futures::stream::iter(events.into_iter().map(Ok))
                    .chain(futures::stream::once(async move { Err(error.into_llm_error()) })),
            ),
            MockTurn::Hang(events) => Box::pin(
                futures::stream::iter(events.into_iter().map(Ok)).chain(futures::stream::pending()),
            ),
        };
        Ok(stream)
    }

    fn metadata(&self) -> ProviderMetadata {
        self.meta.clone()
    }
}
