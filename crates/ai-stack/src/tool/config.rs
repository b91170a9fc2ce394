//! Agent loop configuration and result types.

use std::sync::Arc;
use std::time::Duration;

use crate::chat::ChatMessage;
use crate::events::{EventEmitter, NoopEmitter};
use crate::usage::Usage;

use super::strategy::{LoopStrategy, max_iterations};

/// What to do when tools fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Failed tools become error results and the loop carries on.
    #[default]
    Continue,
    /// End the run with [`LlmError::ToolExecution`](crate::LlmError::ToolExecution)
    /// when every executed tool in a round failed.
    AbortWhenAllFail,
}

/// Configuration for [`agent_loop`](super::agent_loop).
///
/// ```rust
/// use ai_stack::tool::{AgentLoopConfig, max_iterations};
/// use std::time::Duration;
///
/// let config = AgentLoopConfig {
///     strategy: max_iterations(10),
///     timeout: Some(Duration::from_secs(60)),
///     ..Default::default()
/// };
/// assert!(config.parallel_tool_execution);
/// ```
#[derive(Clone)]
pub struct AgentLoopConfig {
    /// Consulted before each model invocation. Default: `max_iterations(5)`.
    pub strategy: LoopStrategy,
    /// Run the server tools of one turn concurrently. Default: `true`.
    pub parallel_tool_execution: bool,
    /// Default: [`FailurePolicy::Continue`].
    pub failure_policy: FailurePolicy,
    /// Wall-clock limit for the whole run. Default: none.
    pub timeout: Option<Duration>,
    /// Observability sink. Default: [`NoopEmitter`].
    pub emitter: Arc<dyn EventEmitter>,
    /// Events buffered between the loop task and its consumer. Default: 64.
    pub channel_capacity: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            strategy: max_iterations(5),
            parallel_tool_execution: true,
            failure_policy: FailurePolicy::Continue,
            timeout: None,
            emitter: Arc::new(NoopEmitter),
            channel_capacity: 64,
        }
    }
}

impl std::fmt::Debug for AgentLoopConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoopConfig")
            .field("parallel_tool_execution", &self.parallel_tool_execution)
            .field("failure_policy", &self.failure_policy)
            .field("timeout", &self.timeout)
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The last turn requested no tools.
    Complete,
    /// The strategy declined another model invocation.
    StrategyStopped,
    /// Tool calls await an approval decision or a client-side result.
    AwaitingClient,
    /// The configured timeout elapsed.
    Timeout,
    /// The cancellation token fired or the consumer went away.
    Cancelled,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentLoopResult {
    /// Full model-facing history, input included.
    pub messages: Vec<ChatMessage>,
    /// Text of the last model turn.
    pub content: String,
    /// Model invocations made.
    pub iterations: u32,
    /// Usage summed over every turn.
    pub total_usage: Usage,
    /// Why the run ended.
    pub termination_reason: TerminationReason,
}
