//! Conversation state machine.
//!
//! A [`ChatClient`] owns one conversation: its messages, a loading flag,
//! and an error slot. Each run sends the history through a
//! [`ConnectionAdapter`], streams the reply into an assistant message
//! created up front, and notifies subscribers after every change.
//!
//! Only one run may be in flight. [`send_message`](ChatClient::send_message)
//! and [`reload`](ChatClient::reload) called while loading fail with
//! [`LlmError::Busy`] and leave the state untouched; nothing is queued.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ai_stack::client::{ChatClient, ChatClientOptions, LoopConnection};
//! use ai_stack::tool::ToolRegistry;
//!
//! # async fn example(provider: Arc<dyn ai_stack::DynProvider>) {
//! let connection = LoopConnection::new(provider, Arc::new(ToolRegistry::new()));
//! let client = ChatClient::new(Arc::new(connection), ChatClientOptions::default());
//! client.subscribe(|state| println!("{} messages", state.messages.len()));
//!
//! if let Err(e) = client.send_message("Hello!").await {
//!     eprintln!("run failed: {e}");
//! }
//! # }
//! ```

mod connection;
mod sink;
mod state;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use connection::{ConnectRequest, ConnectionAdapter, LoopConnection, StreamConnection};
pub use state::{ChatState, Subscriber, SubscriptionId};

use sink::ClientSink;
use state::{ClientCore, Shared};

use crate::chat::{ChatRole, ToolResult};
use crate::chunk::{ChunkStrategy, ImmediateStrategy};
use crate::error::LlmError;
use crate::message::{MessagePart, ToolCallPart, ToolCallState, ToolResultState, UiMessage};
use crate::processor::StreamProcessor;
use crate::stream::{ClientToolRequest, EventKind, StreamEvent};
use crate::tool::{ToolKind, ToolRegistry};

/// Builds a fresh chunk strategy for each run.
pub type ChunkStrategyFactory = Arc<dyn Fn() -> Box<dyn ChunkStrategy> + Send + Sync>;
/// Receives the finished assistant message.
pub type FinishCallback = Arc<dyn Fn(&UiMessage) + Send + Sync>;
/// Receives run errors. Cancellation is not an error.
pub type ErrorCallback = Arc<dyn Fn(&LlmError) + Send + Sync>;
/// Receives every raw event.
pub type ChunkCallback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Configuration for a [`ChatClient`].
#[derive(Clone, Default)]
pub struct ChatClientOptions {
    /// Conversation id sent with each run. Default: a fresh `chat-` id.
    pub id: Option<String>,
    /// Seed history.
    pub initial_messages: Vec<UiMessage>,
    /// Extra data sent with each run.
    pub body: HashMap<String, Value>,
    /// Controls how often text updates reach subscribers. Default:
    /// every delta.
    pub chunk_strategy: Option<ChunkStrategyFactory>,
    /// Client-side executors. Client tool calls whose name has a handler
    /// here run automatically and the conversation resumes.
    pub tools: Option<Arc<ToolRegistry>>,
    /// Called after each successful run.
    pub on_finish: Option<FinishCallback>,
    /// Called when a run fails.
    pub on_error: Option<ErrorCallback>,
    /// Called for every event received.
    pub on_chunk: Option<ChunkCallback>,
}

impl fmt::Debug for ChatClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClientOptions")
            .field("id", &self.id)
            .field("initial_messages", &self.initial_messages.len())
            .field("body", &self.body)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// One conversation.
///
/// Cloning is cheap and every clone drives the same conversation.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    connection: Arc<dyn ConnectionAdapter>,
    options: ChatClientOptions,
    shared: Arc<Shared>,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.shared.lock();
        f.debug_struct("ChatClient")
            .field("id", &self.inner.id)
            .field("messages", &core.messages.len())
            .field("is_loading", &core.is_loading)
            .finish_non_exhaustive()
    }
}

/// A run that has been admitted.
struct Run {
    id: u64,
    token: CancellationToken,
    message_id: String,
    history: Vec<UiMessage>,
    /// Model turns already taken by earlier runs of the same exchange.
    iterations: u32,
}

impl ChatClient {
    /// Creates a client over `connection`.
    pub fn new(connection: Arc<dyn ConnectionAdapter>, options: ChatClientOptions) -> Self {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| format!("chat-{}", uuid::Uuid::new_v4()));
        let shared = Arc::new(Shared::default());
        shared.lock().messages.clone_from(&options.initial_messages);
        Self {
            inner: Arc::new(Inner {
                id,
                connection,
                options,
                shared,
            }),
        }
    }

    /// The conversation id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// A snapshot of the current state.
    pub fn get_state(&self) -> ChatState {
        self.inner.shared.lock().snapshot()
    }

    /// The current messages.
    pub fn messages(&self) -> Vec<UiMessage> {
        self.inner.shared.lock().messages.clone()
    }

    /// Whether a run is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.shared.lock().is_loading
    }

    /// The last run's error.
    pub fn error(&self) -> Option<Arc<LlmError>> {
        self.inner.shared.lock().error.clone()
    }

    /// Registers a change listener. It is called outside the client's
    /// lock and may call back into the client.
    pub fn subscribe(&self, subscriber: impl Fn(&ChatState) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.shared.subscribe(Arc::new(subscriber))
    }

    /// Removes a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.shared.unsubscribe(id)
    }

    /// Appends a user message and runs the conversation.
    ///
    /// Blank input is ignored. Fails with [`LlmError::Busy`] while a run
    /// is in flight, or with the run's error. Stopping the run is not an
    /// error.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<(), Arc<LlmError>> {
        let content = content.into();
        if content.trim().is_empty() {
            return Ok(());
        }
        let run = self.admit(|messages| {
            messages.push(UiMessage::user(content.trim()));
            true
        })?;
        match run {
            Some(run) => self.drive(run).await,
            None => Ok(()),
        }
    }

    /// Appends a message without running anything.
    pub fn append(&self, message: UiMessage) {
        self.inner.shared.mutate(|core| core.messages.push(message));
    }

    /// Replaces the whole history.
    pub fn set_messages(&self, messages: Vec<UiMessage>) {
        self.inner.shared.mutate(|core| core.messages = messages);
    }

    /// Drops everything after the last user message and runs again.
    ///
    /// Does nothing when there is no user message.
    pub async fn reload(&self) -> Result<(), Arc<LlmError>> {
        let run = self.admit(|messages| {
            let Some(last_user) = messages.iter().rposition(|m| m.role == ChatRole::User) else {
                return false;
            };
            messages.truncate(last_user + 1);
            true
        })?;
        match run {
            Some(run) => self.drive(run).await,
            None => Ok(()),
        }
    }

    /// Cancels the run in flight. Content already streamed stays.
    pub fn stop(&self) {
        self.inner.shared.mutate(|core| core.cancel_active());
    }

    /// Stops any run and empties the conversation.
    pub fn clear(&self) {
        self.inner.shared.mutate(|core| {
            core.cancel_active();
            core.messages.clear();
            core.error = None;
        });
    }

    /// Records a client tool's output on its tool-call part. When no
    /// other call of the last assistant message is pending and nothing is
    /// loading, the conversation resumes.
    pub async fn add_tool_result(
        &self,
        tool_call_id: &str,
        output: Value,
        state: ToolResultState,
    ) -> Result<(), Arc<LlmError>> {
        let call_state = match state {
            ToolResultState::Complete => ToolCallState::OutputAvailable,
            ToolResultState::Error => ToolCallState::OutputError,
            ToolResultState::Streaming => {
                return Err(Arc::new(LlmError::InvalidRequest(
                    "a tool result must be complete or an error".into(),
                )));
            }
        };
        let found = self.update_tool_call(|part| part.id == tool_call_id, |part| {
            part.output = Some(output);
            part.state = call_state;
        });
        if !found {
            return Err(Arc::new(LlmError::InvalidRequest(format!(
                "no tool call with id '{tool_call_id}'"
            ))));
        }
        self.resume_if_ready().await
    }

    /// Records an approval decision. A denial still completes the call,
    /// so the conversation resumes the same way as for
    /// [`add_tool_result`](Self::add_tool_result).
    pub async fn add_tool_approval_response(
        &self,
        approval_id: &str,
        approved: bool,
    ) -> Result<(), Arc<LlmError>> {
        let found = self.update_tool_call(
            |part| part.approval.as_ref().is_some_and(|a| a.id == approval_id),
            |part| {
                if let Some(approval) = part.approval.as_mut() {
                    approval.approved = Some(approved);
                }
                part.state = ToolCallState::ApprovalResponded;
            },
        );
        if !found {
            return Err(Arc::new(LlmError::InvalidRequest(format!(
                "no approval with id '{approval_id}'"
            ))));
        }
        self.resume_if_ready().await
    }

    // ── internals ───────────────────────────────────────────────────

    /// Edits the last tool-call part matching `select`.
    fn update_tool_call(
        &self,
        select: impl Fn(&ToolCallPart) -> bool,
        apply: impl FnOnce(&mut ToolCallPart),
    ) -> bool {
        self.inner.shared.mutate(|core| {
            let part = core
                .messages
                .iter_mut()
                .rev()
                .flat_map(|m| m.parts.iter_mut().rev())
                .find_map(|p| match p {
                    MessagePart::ToolCall(part) if select(&*part) => Some(part),
                    _ => None,
                });
            match part {
                Some(part) => {
                    apply(part);
                    true
                }
                None => false,
            }
        })
    }

    async fn resume_if_ready(&self) -> Result<(), Arc<LlmError>> {
        let ready = {
            let core = self.inner.shared.lock();
            !core.is_loading && tools_settled(&core.messages)
        };
        if !ready {
            return Ok(());
        }
        match self.admit(|_| true) {
            Ok(Some(run)) => self.drive(run).await,
            // Another run got in first.
            Ok(None) | Err(_) => Ok(()),
        }
    }

    /// Checks the loading flag, applies `prepare`, and starts a run with
    /// an empty assistant message. `prepare` returning `false` aborts
    /// without touching anything.
    fn admit(
        &self,
        prepare: impl FnOnce(&mut Vec<UiMessage>) -> bool,
    ) -> Result<Option<Run>, Arc<LlmError>> {
        self.inner.shared.mutate(|core| {
            if core.is_loading {
                return Err(Arc::new(LlmError::Busy));
            }
            if !prepare(&mut core.messages) {
                return Ok(None);
            }
            Ok(Some(start_run(core, 0)))
        })
    }

    /// Runs until nothing triggers an automatic continuation.
    async fn drive(&self, first: Run) -> Result<(), Arc<LlmError>> {
        let mut run = first;
        while let Some(next) = self.execute(run).await? {
            run = next;
        }
        Ok(())
    }

    /// Executes one run. Returns the continuation run when the client's
    /// own tools answered every pending call.
    ///
    /// The run stays active until that decision is made, so
    /// [`stop`](Self::stop) also covers client tool execution.
    async fn execute(&self, run: Run) -> Result<Option<Run>, Arc<LlmError>> {
        let options = &self.inner.options;
        let strategy = options
            .chunk_strategy
            .as_ref()
            .map_or_else(|| Box::new(ImmediateStrategy) as Box<dyn ChunkStrategy>, |make| make());
        let sink = ClientSink::new(Arc::clone(&self.inner.shared), run.message_id.clone());
        let mut processor = StreamProcessor::with_strategy(sink, strategy);

        let request = ConnectRequest {
            messages: run.history.clone(),
            body: options.body.clone(),
            conversation_id: self.inner.id.clone(),
            iterations: run.iterations,
        };
        let mut turns = 0u32;
        let outcome: Result<(), LlmError> = async {
            let connect = self.inner.connection.connect(request, run.token.clone());
            let stream = tokio::select! {
                biased;
                () = run.token.cancelled() => return Ok(()),
                stream = connect => stream?,
            };
            let cancelled = run.token.clone();
            let stream = stream
                .take_until(async move { cancelled.cancelled().await })
                .inspect(|item| {
                    let Ok(event) = item else { return };
                    if matches!(event.kind, EventKind::Done { .. }) {
                        turns += 1;
                    }
                    if let Some(callback) = &options.on_chunk {
                        callback(event);
                    }
                });
            processor.process(stream).await.map(|_| ())
        }
        .await;

        let cancelled = run.token.is_cancelled();
        if let Err(e) = outcome {
            if !cancelled {
                let e = Arc::new(e);
                self.inner.shared.mutate(|core| {
                    release(core, run.id);
                    core.error = Some(Arc::clone(&e));
                });
                tracing::warn!(conversation = %self.inner.id, error = %e, "chat run failed");
                if let Some(on_error) = &options.on_error {
                    on_error(&e);
                }
                return Err(e);
            }
        }
        if cancelled {
            tracing::debug!(conversation = %self.inner.id, "chat run stopped");
            return Ok(None);
        }

        if let Some(on_finish) = &options.on_finish {
            let message = self
                .inner
                .shared
                .lock()
                .messages
                .iter()
                .find(|m| m.id == run.message_id)
                .cloned();
            if let Some(message) = message {
                on_finish(&message);
            }
        }

        let requests = processor.handlers_mut().take_client_requests();
        let Some(executed) = self.run_client_tools(&run, requests).await else {
            tracing::debug!(conversation = %self.inner.id, "chat run stopped during client tools");
            return Ok(None);
        };

        let iterations = run.iterations.saturating_add(turns);
        Ok(self.inner.shared.mutate(|core| {
            if !core.is_active(run.id) {
                return None;
            }
            release(core, run.id);
            if executed && tools_settled(&core.messages) {
                tracing::debug!(iterations, "continuing after client tools");
                Some(start_run(core, iterations))
            } else {
                None
            }
        }))
    }

    /// Executes the requested tools that [`ChatClientOptions::tools`]
    /// can run locally. Returns `None` when the run was stopped first,
    /// otherwise whether any tool ran.
    ///
    /// A stopped run stops waiting; the tool task itself finishes and
    /// its result is dropped.
    async fn run_client_tools(&self, run: &Run, requests: Vec<ClientToolRequest>) -> Option<bool> {
        let Some(tools) = &self.inner.options.tools else {
            return Some(false);
        };
        let mut executed = false;
        for request in requests {
            if !matches!(tools.lookup(&request.tool_name), Some(ToolKind::Server(_))) {
                continue;
            }
            let ClientToolRequest {
                tool_call_id,
                tool_name,
                input,
            } = request;
            let registry = Arc::clone(tools);
            let (call_id, name) = (tool_call_id.clone(), tool_name.clone());
            let task = tokio::spawn(async move { registry.execute_parsed(&call_id, &name, input).await });
            let result = tokio::select! {
                biased;
                () = run.token.cancelled() => return None,
                joined = task => joined.unwrap_or_else(|e| {
                    ToolResult::error(&tool_call_id, format!("Tool '{tool_name}' failed: {e}"))
                }),
            };
            let state = if result.is_error {
                ToolCallState::OutputError
            } else {
                ToolCallState::OutputAvailable
            };
            self.update_tool_call(|part| part.id == result.tool_call_id, |part| {
                part.output = Some(Value::String(result.content.clone()));
                part.state = state;
            });
            executed = true;
        }
        Some(executed)
    }
}

/// Starts a run: a fresh token, the history so far, and an empty
/// assistant message for the reply.
fn start_run(core: &mut ClientCore, iterations: u32) -> Run {
    let (id, token) = core.begin_run();
    let history = core.messages.clone();
    let placeholder = UiMessage::new(ChatRole::Assistant, Vec::new());
    let message_id = placeholder.id.clone();
    core.messages.push(placeholder);
    Run {
        id,
        token,
        message_id,
        history,
        iterations,
    }
}

/// Marks `run` finished if it is still the active one.
fn release(core: &mut ClientCore, run: u64) {
    if core.is_active(run) {
        core.active = None;
        core.is_loading = false;
    }
}

/// Whether every tool call of the last assistant message has an answer:
/// an output, an approval decision, or a tool-result part.
fn tools_settled(messages: &[UiMessage]) -> bool {
    let Some(last) = messages.iter().rev().find(|m| m.role == ChatRole::Assistant) else {
        return false;
    };
    let mut calls = last
        .parts
        .iter()
        .filter_map(|p| match p {
            MessagePart::ToolCall(part) => Some(part),
            _ => None,
        })
        .peekable();
    if calls.peek().is_none() {
        return false;
    }
    calls.all(|part| {
        part.output.is_some()
            || part.state == ToolCallState::ApprovalResponded
            || last.has_tool_result(&part.id)
    })
}
