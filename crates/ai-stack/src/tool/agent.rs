//! Entry points for running the agent loop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ToolRegistry;
use super::approval::ClientState;
use super::config::{AgentLoopConfig, AgentLoopResult};
use super::loop_core::LoopCore;
use crate::error::LlmError;
use crate::provider::{ChatParams, DynProvider};
use crate::stream::{ChatStream, new_stream_id};

/// Input to one agent loop run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentLoopRequest {
    /// The request, history included. `tools` defaults to every tool in
    /// the registry.
    pub params: ChatParams,
    /// Approval decisions and client tool outputs gathered since the
    /// previous run.
    pub client_state: ClientState,
    /// Model invocations already spent on this exchange. The strategy
    /// counts from here, so a resumed run shares the budget of the runs
    /// before it.
    pub iterations: u32,
}

impl From<ChatParams> for AgentLoopRequest {
    fn from(params: ChatParams) -> Self {
        Self {
            params,
            client_state: ClientState::default(),
            iterations: 0,
        }
    }
}

/// Spawns an agent loop and returns its event stream and result handle.
///
/// Events flow through a bounded channel of
/// [`channel_capacity`](AgentLoopConfig::channel_capacity), so a slow
/// consumer pauses the loop. Every event carries the run's stream id.
/// Provider and tool failures arrive as an `error` event and as the
/// handle's `Err`. Dropping the stream or firing `cancel` stops the run
/// with [`TerminationReason::Cancelled`](super::TerminationReason::Cancelled).
///
/// Must be called within a Tokio runtime.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use futures::StreamExt;
/// use tokio_util::sync::CancellationToken;
/// use ai_stack::tool::{AgentLoopConfig, ToolRegistry, agent_loop};
/// use ai_stack::{ChatMessage, ChatParams, DynProvider, EventKind};
///
/// async fn example(provider: Arc<dyn DynProvider>) -> Result<(), Box<dyn std::error::Error>> {
///     let params = ChatParams {
///         messages: vec![ChatMessage::user("Hello")],
///         ..Default::default()
///     };
///     let (mut events, handle) = agent_loop(
///         provider,
///         Arc::new(ToolRegistry::new()),
///         params.into(),
///         AgentLoopConfig::default(),
///         CancellationToken::new(),
///     );
///     while let Some(event) = events.next().await {
///         if let EventKind::Content { delta } = event?.kind {
///             print!("{delta}");
///         }
///     }
///     let result = handle.await??;
///     println!("\n{} iterations", result.iterations);
///     Ok(())
/// }
/// ```
pub fn agent_loop(
    provider: Arc<dyn DynProvider>,
    registry: Arc<ToolRegistry>,
    request: AgentLoopRequest,
    config: AgentLoopConfig,
    cancel: CancellationToken,
) -> (ChatStream, JoinHandle<Result<AgentLoopResult, LlmError>>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let core = LoopCore::new(
        provider,
        registry,
        request,
        config,
        new_stream_id(),
        tx,
        cancel,
    );
    let handle = tokio::spawn(core.run());

    let stream: ChatStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }));
    (stream, handle)
}

/// Runs an agent loop to completion in the current task, discarding
/// the event stream.
pub async fn run_agent_loop(
    provider: Arc<dyn DynProvider>,
    registry: Arc<ToolRegistry>,
    request: AgentLoopRequest,
    config: AgentLoopConfig,
    cancel: CancellationToken,
) -> Result<AgentLoopResult, LlmError> {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let core = LoopCore::new(
        provider,
        registry,
        request,
        config,
        new_stream_id(),
        tx,
        cancel,
    );
    let drain = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .for_each(|_| async {});
    let (result, ()) = tokio::join!(core.run(), drain);
    result
}
