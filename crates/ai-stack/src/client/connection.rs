//! How a chat client reaches a model.
//!
//! A [`ConnectionAdapter`] turns the client's UI history into a stream of
//! events. [`LoopConnection`] runs the agent loop in-process;
//! [`StreamConnection`] wraps any closure. The HTTP transport lives in
//! the `ai-stack-http` crate.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::message::{UiMessage, ui_to_model_messages};
use crate::provider::{ChatParams, DynProvider};
use crate::stream::ChatStream;
use crate::tool::{AgentLoopConfig, AgentLoopRequest, ClientState, ToolRegistry, agent_loop};

/// What a client sends for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Full UI history, approval decisions and client outputs included.
    pub messages: Vec<UiMessage>,
    /// Extra request data from [`ChatClientOptions::body`](super::ChatClientOptions::body).
    #[serde(rename = "data")]
    pub body: HashMap<String, Value>,
    /// The client's id.
    pub conversation_id: String,
    /// Model turns already taken by this exchange. Non-zero when the
    /// client continues on its own after running client tools; loop
    /// strategies should count from here.
    pub iterations: u32,
}

/// Opens an event stream for a run.
///
/// Implementations should stop work when `cancel` fires. The client also
/// drops the returned stream on cancellation.
pub trait ConnectionAdapter: Send + Sync {
    /// Starts a run.
    fn connect<'a>(
        &'a self,
        request: ConnectRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatStream, LlmError>> + Send + 'a>>;
}

/// Runs the agent loop in-process against a model adapter.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ai_stack::client::{ChatClient, ChatClientOptions, LoopConnection};
/// use ai_stack::tool::ToolRegistry;
///
/// # fn example(provider: Arc<dyn ai_stack::DynProvider>) {
/// let connection = LoopConnection::new(provider, Arc::new(ToolRegistry::new()));
/// let client = ChatClient::new(Arc::new(connection), ChatClientOptions::default());
/// # }
/// ```
#[derive(Clone)]
pub struct LoopConnection {
    provider: Arc<dyn DynProvider>,
    registry: Arc<ToolRegistry>,
    config: AgentLoopConfig,
    system: Option<String>,
}

impl fmt::Debug for LoopConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopConnection")
            .field("provider", &self.provider.metadata())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LoopConnection {
    /// A connection with the default loop configuration.
    pub fn new(provider: Arc<dyn DynProvider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            config: AgentLoopConfig::default(),
            system: None,
        }
    }

    /// Replaces the loop configuration.
    #[must_use]
    pub fn with_config(mut self, config: AgentLoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the system prompt sent with every run.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

impl ConnectionAdapter for LoopConnection {
    fn connect<'a>(
        &'a self,
        request: ConnectRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatStream, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let params = ChatParams {
                messages: ui_to_model_messages(&request.messages),
                system: self.system.clone(),
                metadata: request.body,
                ..Default::default()
            };
            let loop_request = AgentLoopRequest {
                params,
                client_state: ClientState::from_ui_messages(&request.messages),
                iterations: request.iterations,
            };
            // Failures reach the consumer as an `error` event, so the
            // handle is not awaited.
            let (stream, _handle) = agent_loop(
                Arc::clone(&self.provider),
                Arc::clone(&self.registry),
                loop_request,
                self.config.clone(),
                cancel,
            );
            Ok(stream)
        })
    }
}

type ConnectFuture = Pin<Box<dyn Future<Output = Result<ChatStream, LlmError>> + Send>>;
type ConnectFn = dyn Fn(ConnectRequest, CancellationToken) -> ConnectFuture + Send + Sync;

/// A connection backed by a closure.
///
/// ```rust
/// use ai_stack::client::StreamConnection;
/// use ai_stack::{ChatStream, EventKind, StreamEvent};
///
/// let connection = StreamConnection::new(|_request, _cancel| async move {
///     let events = vec![Ok::<_, ai_stack::LlmError>(StreamEvent::new("s", EventKind::Content { delta: "hi".into() }))];
///     Ok(Box::pin(futures::stream::iter(events)) as ChatStream)
/// });
/// ```
pub struct StreamConnection {
    connect: Box<ConnectFn>,
}

impl fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection").finish_non_exhaustive()
    }
}

impl StreamConnection {
    /// Wraps `connect`.
    pub fn new<F, Fut>(connect: F) -> Self
    where
        F: Fn(ConnectRequest, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ChatStream, LlmError>> + Send + 'static,
    {
        Self {
            connect: Box::new(
                move |request: ConnectRequest, cancel: CancellationToken| -> ConnectFuture {
                    Box::pin(connect(request, cancel))
                },
            ),
        }
    }
}

impl ConnectionAdapter for StreamConnection {
    fn connect<'a>(
        &'a self,
        request: ConnectRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatStream, LlmError>> + Send + 'a>> {
        (self.connect)(request, cancel)
    }
}
