//! Optional observability events.
//!
//! The agent loop reports lifecycle milestones to an [`EventEmitter`].
//! The default [`NoopEmitter`] does nothing, so nothing in the core
//! depends on an emitter being installed. [`TracingEmitter`] forwards
//! every event to `tracing` at debug level.
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use ai_stack::events::{AiEvent, EventEmitter};
//!
//! #[derive(Default)]
//! struct Counter(Mutex<usize>);
//!
//! impl EventEmitter for Counter {
//!     fn emit(&self, _event: &AiEvent) {
//!         *self.0.lock().unwrap() += 1;
//!     }
//! }
//!
//! let emitter: Arc<dyn EventEmitter> = Arc::new(Counter::default());
//! emitter.emit(&AiEvent::StreamEnded { stream_id: "s".into(), iterations: 1 });
//! ```

use std::time::Duration;

use serde_json::Value;

use crate::usage::Usage;

/// A lifecycle milestone.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AiEvent {
    /// A loop run began.
    StreamStarted {
        /// Id stamped on every event of the run.
        stream_id: String,
        /// Adapter name.
        provider: String,
        /// Model name.
        model: String,
    },
    /// A model invocation is about to start.
    IterationStarted {
        /// Run id.
        stream_id: String,
        /// Zero-based iteration.
        iteration: u32,
    },
    /// A server-side tool finished.
    ToolCallCompleted {
        /// Run id.
        stream_id: String,
        /// The call.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Wall time spent in the executor, retries included.
        duration: Duration,
        /// Whether the tool failed.
        is_error: bool,
    },
    /// A tool call is waiting on approval.
    ApprovalRequested {
        /// Run id.
        stream_id: String,
        /// The call.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
        /// Parsed arguments.
        input: Value,
    },
    /// A client tool is waiting to run at the consumer.
    ToolInputAvailable {
        /// Run id.
        stream_id: String,
        /// The call.
        tool_call_id: String,
        /// Tool name.
        tool_name: String,
    },
    /// A model turn reported usage.
    UsageReported {
        /// Run id.
        stream_id: String,
        /// Usage for the turn.
        usage: Usage,
    },
    /// A loop run ended.
    StreamEnded {
        /// Run id.
        stream_id: String,
        /// Completed iterations.
        iterations: u32,
    },
}

/// Receives [`AiEvent`]s. Implementations must not block.
pub trait EventEmitter: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: &AiEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: &AiEvent) {}
}

/// Logs every event with `tracing::debug!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit(&self, event: &AiEvent) {
        match event {
            AiEvent::StreamStarted {
                stream_id,
                provider,
                model,
            } => tracing::debug!(%stream_id, %provider, %model, "stream started"),
            AiEvent::IterationStarted {
                stream_id,
                iteration,
            } => tracing::debug!(%stream_id, iteration, "iteration started"),
            AiEvent::ToolCallCompleted {
                stream_id,
                tool_call_id,
                tool_name,
                duration,
                is_error,
            } => tracing::debug!(
                %stream_id,
                %tool_call_id,
                %tool_name,
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                is_error,
                "tool call completed"
            ),
            AiEvent::ApprovalRequested {
                stream_id,
                tool_call_id,
                tool_name,
                ..
            } => tracing::debug!(%stream_id, %tool_call_id, %tool_name, "approval requested"),
            AiEvent::ToolInputAvailable {
                stream_id,
                tool_call_id,
                tool_name,
            } => tracing::debug!(%stream_id, %tool_call_id, %tool_name, "client tool input available"),
            AiEvent::UsageReported { stream_id, usage } => tracing::debug!(
                %stream_id,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "usage reported"
            ),
            AiEvent::StreamEnded {
                stream_id,
                iterations,
            } => tracing::debug!(%stream_id, iterations, "stream ended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_emitters_are_object_safe() {
        let emitters: Vec<Arc<dyn EventEmitter>> = vec![Arc::new(NoopEmitter), Arc::new(TracingEmitter)];
        for emitter in emitters {
            emitter.emit(&AiEvent::IterationStarted {
                stream_id: "s".into(),
                iteration: 0,
            });
        }
    }

    #[test]
    fn test_tracing_emitter_under_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            TracingEmitter.emit(&AiEvent::ToolCallCompleted {
                stream_id: "s".into(),
                tool_call_id: "c1".into(),
                tool_name: "t".into(),
                duration: Duration::from_millis(12),
                is_error: false,
            });
        });
    }
}
