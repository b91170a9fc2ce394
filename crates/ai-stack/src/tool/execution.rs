//! Server-side execution of one turn's tool calls.
//!
//! Each call runs in its own Tokio task. Awaiting the results can be
//! abandoned at any point: a cancelled run drops the join handles, the
//! tasks finish on their own, and their results go nowhere.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::ToolRegistry;
use crate::chat::{ToolCall, ToolResult};
use crate::events::{AiEvent, EventEmitter};

/// A call ready to run, tagged with its position in the turn.
pub(crate) struct PendingExecution {
    pub index: usize,
    pub call: ToolCall,
    pub input: Value,
}

/// A finished call, tagged with its position in the turn.
pub(crate) struct ExecutedCall {
    pub index: usize,
    pub tool_name: String,
    pub result: ToolResult,
}

/// Runs calls and returns their results in call order.
///
/// In parallel mode every call is spawned up front; sequential mode
/// spawns the next call only after the previous one finished.
pub(crate) async fn execute_calls(
    registry: &Arc<ToolRegistry>,
    calls: Vec<PendingExecution>,
    parallel: bool,
    emitter: &Arc<dyn EventEmitter>,
    stream_id: &str,
) -> Vec<ExecutedCall> {
    let spawn = |pending: PendingExecution| {
        Spawned::start(Arc::clone(registry), Arc::clone(emitter), stream_id.to_owned(), pending)
    };

    let mut executed = Vec::with_capacity(calls.len());
    if parallel && calls.len() > 1 {
        let spawned: Vec<Spawned> = calls.into_iter().map(spawn).collect();
        for call in spawned {
            executed.push(call.join().await);
        }
    } else {
        for pending in calls {
            executed.push(spawn(pending).join().await);
        }
    }
    executed.sort_by_key(|e| e.index);
    executed
}

/// A call running in its own task.
struct Spawned {
    index: usize,
    call_id: String,
    tool_name: String,
    handle: JoinHandle<ToolResult>,
}

impl Spawned {
    fn start(
        registry: Arc<ToolRegistry>,
        emitter: Arc<dyn EventEmitter>,
        stream_id: String,
        pending: PendingExecution,
    ) -> Self {
        let PendingExecution { index, call, input } = pending;
        let (call_id, tool_name) = (call.id.clone(), call.name.clone());
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let result = registry.execute_parsed(&call.id, &call.name, input).await;
            let duration = start.elapsed();

            tracing::debug!(
                tool = %call.name,
                call_id = %call.id,
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                is_error = result.is_error,
                "tool executed"
            );
            emitter.emit(&AiEvent::ToolCallCompleted {
                stream_id,
                tool_call_id: call.id,
                tool_name: call.name,
                duration,
                is_error: result.is_error,
            });
            result
        });
        Self {
            index,
            call_id,
            tool_name,
            handle,
        }
    }

    async fn join(self) -> ExecutedCall {
        let result = match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %self.tool_name, error = %e, "tool task failed");
                ToolResult::error(&self.call_id, format!("Tool '{}' failed: {e}", self.tool_name))
            }
        };
        ExecutedCall {
            index: self.index,
            tool_name: self.tool_name,
            result,
        }
    }
}
