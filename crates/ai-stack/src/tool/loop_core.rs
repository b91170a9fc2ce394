//! The agent loop driver.
//!
//! [`LoopCore`] owns the history for one run and drives
//! invoke → process → plan → execute until the turn requests no tools,
//! the strategy declines, a call needs the client, or the run is
//! interrupted. Every await is raced against the cancellation token and
//! the optional deadline. An interrupt drops the adapter stream at once;
//! tools already running finish in their own tasks and their results are
//! discarded.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::agent::AgentLoopRequest;
use super::approval::{ClientState, PlannedCall, plan_tool_calls};
use super::config::{AgentLoopConfig, AgentLoopResult, FailurePolicy, TerminationReason};
use super::execution::{PendingExecution, execute_calls};
use super::strategy::AgentLoopState;
use super::{ToolError, ToolRegistry};
use crate::chat::{ChatMessage, ChatRole, ToolCall, ToolResult};
use crate::error::LlmError;
use crate::events::AiEvent;
use crate::processor::{ProcessorResult, StreamProcessor};
use crate::provider::{ChatParams, DynProvider};
use crate::stream::{EventKind, FinishReason, StreamEvent};
use crate::usage::Usage;

pub(crate) type EventSender = mpsc::Sender<Result<StreamEvent, LlmError>>;

/// Why the driver stopped early.
enum Halt {
    Cancelled,
    TimedOut,
    /// Not yet visible to the consumer.
    Failed(LlmError),
    /// Already forwarded as an `error` event.
    Reported(LlmError),
}

impl From<LlmError> for Halt {
    fn from(err: LlmError) -> Self {
        Self::Failed(err)
    }
}

/// A call held back for the client.
enum Suspended {
    Approval(crate::stream::ApprovalRequest),
    Client(crate::stream::ClientToolRequest),
}

pub(crate) struct LoopCore {
    provider: Arc<dyn DynProvider>,
    registry: Arc<ToolRegistry>,
    config: AgentLoopConfig,
    params: ChatParams,
    client_state: ClientState,
    stream_id: String,
    tx: EventSender,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    iterations: u32,
    total_usage: Usage,
    content: String,
    finish_reason: Option<FinishReason>,
}

impl LoopCore {
    pub(crate) fn new(
        provider: Arc<dyn DynProvider>,
        registry: Arc<ToolRegistry>,
        request: AgentLoopRequest,
        config: AgentLoopConfig,
        stream_id: String,
        tx: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        let AgentLoopRequest {
            mut params,
            client_state,
            iterations,
        } = request;
        if params.tools.is_none() && !registry.is_empty() {
            params.tools = Some(registry.definitions());
        }
        let deadline = config.timeout.map(|t| Instant::now() + t);
        Self {
            provider,
            registry,
            config,
            params,
            client_state,
            stream_id,
            tx,
            cancel,
            deadline,
            iterations,
            total_usage: Usage::default(),
            content: String::new(),
            finish_reason: None,
        }
    }

    /// Runs to termination. Errors are forwarded to the consumer as an
    /// `error` event before being returned.
    #[instrument(name = "agent_loop", skip_all, fields(stream_id = %self.stream_id))]
    pub(crate) async fn run(mut self) -> Result<AgentLoopResult, LlmError> {
        let meta = self.provider.metadata();
        self.config.emitter.emit(&AiEvent::StreamStarted {
            stream_id: self.stream_id.clone(),
            provider: meta.name.into_owned(),
            model: meta.model,
        });

        let outcome = self.drive().await;
        let termination_reason = match outcome {
            Ok(reason) => reason,
            Err(Halt::Cancelled) => TerminationReason::Cancelled,
            Err(Halt::TimedOut) => {
                tracing::warn!(iterations = self.iterations, "agent loop timed out");
                TerminationReason::Timeout
            }
            Err(Halt::Failed(err)) => {
                let event = StreamEvent::from_error(&self.stream_id, &err);
                // The consumer may already be gone.
                let _ = self.tx.send(Ok(event)).await;
                return Err(self.fail(err));
            }
            Err(Halt::Reported(err)) => return Err(self.fail(err)),
        };

        tracing::debug!(
            iterations = self.iterations,
            reason = ?termination_reason,
            "agent loop finished"
        );
        self.end();
        Ok(AgentLoopResult {
            messages: self.params.messages,
            content: self.content,
            iterations: self.iterations,
            total_usage: self.total_usage,
            termination_reason,
        })
    }

    fn fail(&self, err: LlmError) -> LlmError {
        tracing::warn!(error = %err, iterations = self.iterations, "agent loop failed");
        self.end();
        err
    }

    fn end(&self) {
        self.config.emitter.emit(&AiEvent::StreamEnded {
            stream_id: self.stream_id.clone(),
            iterations: self.iterations,
        });
    }

    async fn drive(&mut self) -> Result<TerminationReason, Halt> {
        let pending = self.pending_calls();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "resolving pending tool calls");
            if let Some(reason) = self.run_tools(&pending).await? {
                return Ok(reason);
            }
        }

        loop {
            let proceed = (self.config.strategy)(&AgentLoopState {
                iteration_count: self.iterations,
                messages: &self.params.messages,
                finish_reason: self.finish_reason,
            });
            if !proceed {
                return Ok(TerminationReason::StrategyStopped);
            }

            let turn = self.invoke_model().await?;
            let calls = valid_calls(turn.tool_calls.unwrap_or_default());
            if calls.is_empty() {
                if !turn.content.is_empty() {
                    self.params.messages.push(ChatMessage::assistant(turn.content));
                }
                return Ok(TerminationReason::Complete);
            }

            self.params
                .messages
                .push(ChatMessage::assistant_with_calls(turn.content, calls.clone()));
            if let Some(reason) = self.run_tools(&calls).await? {
                return Ok(reason);
            }
        }
    }

    /// Calls of the trailing assistant message that have no result yet.
    fn pending_calls(&self) -> Vec<ToolCall> {
        let messages = &self.params.messages;
        let Some(pos) = messages.iter().rposition(|m| m.role != ChatRole::Tool) else {
            return Vec::new();
        };
        if messages[pos].role != ChatRole::Assistant {
            return Vec::new();
        }
        let answered: Vec<&str> = messages[pos + 1..]
            .iter()
            .flat_map(ChatMessage::tool_results)
            .map(|r| r.tool_call_id.as_str())
            .collect();
        messages[pos]
            .tool_calls()
            .into_iter()
            .filter(|call| !answered.contains(&call.id.as_str()))
            .cloned()
            .collect()
    }

    async fn invoke_model(&mut self) -> Result<ProcessorResult, Halt> {
        self.config.emitter.emit(&AiEvent::IterationStarted {
            stream_id: self.stream_id.clone(),
            iteration: self.iterations,
        });
        tracing::debug!(
            iteration = self.iterations,
            messages = self.params.messages.len(),
            "invoking model"
        );

        let mut stream = self
            .race(self.provider.stream_boxed(&self.params))
            .await??;
        self.iterations += 1;

        let mut processor = StreamProcessor::new(());
        while let Some(item) = self.race(stream.next()).await? {
            let event = item?.with_id(&self.stream_id);
            let outcome = processor.process_event(&event);
            if let EventKind::Done {
                usage: Some(usage), ..
            } = &event.kind
            {
                self.config.emitter.emit(&AiEvent::UsageReported {
                    stream_id: self.stream_id.clone(),
                    usage: *usage,
                });
            }
            self.send(event).await?;
            outcome.map_err(Halt::Reported)?;
        }

        let turn = processor.finish();
        self.total_usage += turn.usage;
        self.finish_reason = turn.finish_reason;
        turn.content.clone_into(&mut self.content);
        Ok(turn)
    }

    /// Plans, executes, and records one set of calls. Returns a
    /// termination reason when the run must stop here.
    async fn run_tools(&mut self, calls: &[ToolCall]) -> Result<Option<TerminationReason>, Halt> {
        let plans = plan_tool_calls(calls, &self.registry, &self.client_state);

        let mut results: Vec<(usize, ToolResult)> = Vec::new();
        let mut to_execute = Vec::new();
        let mut suspended = Vec::new();
        for (index, plan) in plans.into_iter().enumerate() {
            match plan {
                PlannedCall::Resolved(result) => results.push((index, result)),
                PlannedCall::Execute { call, input } => {
                    to_execute.push(PendingExecution { index, call, input });
                }
                PlannedCall::NeedsApproval(request) => suspended.push(Suspended::Approval(request)),
                PlannedCall::NeedsClient(request) => suspended.push(Suspended::Client(request)),
            }
        }

        if !to_execute.is_empty() {
            let executed = self
                .race(execute_calls(
                    &self.registry,
                    to_execute,
                    self.config.parallel_tool_execution,
                    &self.config.emitter,
                    &self.stream_id,
                ))
                .await?;

            if self.config.failure_policy == FailurePolicy::AbortWhenAllFail
                && executed.iter().all(|e| e.result.is_error)
            {
                if let Some(first) = executed.first() {
                    return Err(Halt::Failed(LlmError::ToolExecution {
                        tool_name: first.tool_name.clone(),
                        source: Box::new(ToolError::new(first.result.content.clone())),
                    }));
                }
            }
            results.extend(executed.into_iter().map(|e| (e.index, e.result)));
        }

        results.sort_by_key(|(index, _)| *index);
        for (_, result) in results {
            self.send_kind(EventKind::ToolResult(result.clone())).await?;
            self.params.messages.push(ChatMessage::tool_result(result));
        }

        if suspended.is_empty() {
            return Ok(None);
        }
        for item in suspended {
            let kind = match item {
                Suspended::Approval(request) => {
                    self.config.emitter.emit(&AiEvent::ApprovalRequested {
                        stream_id: self.stream_id.clone(),
                        tool_call_id: request.tool_call_id.clone(),
                        tool_name: request.tool_name.clone(),
                        input: request.input.clone(),
                    });
                    EventKind::ApprovalRequested(request)
                }
                Suspended::Client(request) => {
                    self.config.emitter.emit(&AiEvent::ToolInputAvailable {
                        stream_id: self.stream_id.clone(),
                        tool_call_id: request.tool_call_id.clone(),
                        tool_name: request.tool_name.clone(),
                    });
                    EventKind::ToolInputAvailable(request)
                }
            };
            self.send_kind(kind).await?;
        }
        Ok(Some(TerminationReason::AwaitingClient))
    }

    async fn send_kind(&self, kind: EventKind) -> Result<(), Halt> {
        self.send(StreamEvent::new(&self.stream_id, kind)).await
    }

    /// Forwards one event. A dropped receiver counts as cancellation.
    async fn send(&self, event: StreamEvent) -> Result<(), Halt> {
        self.race(self.tx.send(Ok(event))).await?.map_err(|_| {
            tracing::debug!("event consumer dropped");
            Halt::Cancelled
        })
    }

    /// Awaits `fut` unless the run is cancelled or out of time first.
    async fn race<F: Future>(&self, fut: F) -> Result<F::Output, Halt> {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Halt::Cancelled),
            () = expired => Err(Halt::TimedOut),
            out = fut => Ok(out),
        }
    }
}

/// Drops calls missing an id or a name.
fn valid_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .filter(|call| {
            let ok = !call.id.is_empty() && !call.name.is_empty();
            if !ok {
                tracing::warn!(id = %call.id, name = %call.name, "dropping malformed tool call");
            }
            ok
        })
        .collect()
}
