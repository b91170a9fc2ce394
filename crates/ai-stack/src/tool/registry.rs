//! Tool registry: lookup, argument parsing, validation, and execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;

use super::{ToolError, ToolHandler};
use crate::chat::{ToolCall, ToolResult};
use crate::provider::{ToolDefinition, ToolRetryConfig};

/// How a registered tool is run.
#[derive(Clone)]
pub enum ToolKind<'a> {
    /// Executed in-process by a handler.
    Server(&'a Arc<dyn ToolHandler>),
    /// Executed by the consumer; the loop surfaces the call and suspends.
    Client(&'a ToolDefinition),
}

impl ToolKind<'_> {
    /// The tool's definition.
    pub fn definition(&self) -> ToolDefinition {
        match self {
            Self::Server(handler) => handler.definition(),
            Self::Client(def) => (*def).clone(),
        }
    }
}

/// Tools available to the agent loop, indexed by name.
///
/// Tools registered with [`register`](Self::register) have a server-side
/// executor. Tools registered with [`register_client`](Self::register_client)
/// only have a definition: the model can call them, but the call is
/// handed to the consumer.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
    client_tools: HashMap<String, ToolDefinition>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut server: Vec<_> = self.handlers.keys().collect();
        server.sort();
        let mut client: Vec<_> = self.client_tools.keys().collect();
        client.sort();
        f.debug_struct("ToolRegistry")
            .field("server_tools", &server)
            .field("client_tools", &client)
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a server-side tool, replacing any tool of the same name.
    pub fn register(&mut self, handler: impl ToolHandler + 'static) -> &mut Self {
        self.register_shared(Arc::new(handler))
    }

    /// Registers a shared server-side tool.
    pub fn register_shared(&mut self, handler: Arc<dyn ToolHandler>) -> &mut Self {
        let name = handler.definition().name;
        self.client_tools.remove(&name);
        self.handlers.insert(name, handler);
        self
    }

    /// Registers a client-side tool, replacing any tool of the same name.
    pub fn register_client(&mut self, definition: ToolDefinition) -> &mut Self {
        self.handlers.remove(&definition.name);
        self.client_tools.insert(definition.name.clone(), definition);
        self
    }

    /// Looks a tool up by name.
    pub fn lookup(&self, name: &str) -> Option<ToolKind<'_>> {
        self.handlers
            .get(name)
            .map(ToolKind::Server)
            .or_else(|| self.client_tools.get(name).map(ToolKind::Client))
    }

    /// Whether a tool with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name) || self.client_tools.contains_key(name)
    }

    /// Definitions of every tool, sorted by name.
    ///
    /// Pass these to [`ChatParams::tools`](crate::ChatParams::tools).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .handlers
            .values()
            .map(|h| h.definition())
            .chain(self.client_tools.values().cloned())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.handlers.len() + self.client_tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses, validates, and executes one call.
    ///
    /// Never fails at the outer level: unknown tools, unparseable or
    /// invalid arguments, client-only tools, and executor errors all come
    /// back as an error [`ToolResult`].
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let input = match parse_arguments(call) {
            Ok(input) => input,
            Err(e) => return ToolResult::error(&call.id, e.message),
        };
        self.execute_parsed(&call.id, &call.name, input).await
    }

    /// Executes a call whose arguments are already parsed.
    pub(crate) async fn execute_parsed(&self, call_id: &str, name: &str, input: Value) -> ToolResult {
        let handler = match self.lookup(name) {
            Some(ToolKind::Server(handler)) => handler,
            Some(ToolKind::Client(_)) => {
                return ToolResult::error(call_id, format!("Tool '{name}' has no server executor"));
            }
            None => return ToolResult::error(call_id, format!("Unknown tool: {name}")),
        };
        let definition = handler.definition();

        #[cfg(feature = "schema")]
        {
            if let Err(e) = definition.parameters.validate(&input) {
                return ToolResult::error(
                    call_id,
                    format!("Invalid arguments for tool '{name}': {e}"),
                );
            }
        }

        let outcome = match &definition.retry {
            Some(config) => execute_with_retry(handler.as_ref(), input, config).await,
            None => handler.execute(input).await,
        };
        match outcome {
            Ok(output) => ToolResult::ok(call_id, output.content),
            Err(e) => ToolResult::error(call_id, e.message),
        }
    }
}

/// Parses a call's raw argument string. An empty string is `{}`.
pub(crate) fn parse_arguments(call: &ToolCall) -> Result<Value, ToolError> {
    call.parsed_arguments().map_err(|_| {
        tracing::warn!(tool = %call.name, call_id = %call.id, "unparseable tool arguments");
        ToolError::new(format!(
            "Failed to parse tool arguments as JSON: {}",
            call.arguments
        ))
    })
}

async fn execute_with_retry(
    handler: &dyn ToolHandler,
    input: Value,
    config: &ToolRetryConfig,
) -> Result<super::ToolOutput, ToolError> {
    let mut attempt = 0u32;
    loop {
        match handler.execute(input.clone()).await {
            Ok(output) => return Ok(output),
            Err(e) => {
                let should_retry = config
                    .retry_if
                    .as_ref()
                    .is_none_or(|predicate| predicate(&e.message));
                if !should_retry || attempt >= config.max_retries {
                    return Err(e);
                }
                let backoff = compute_backoff(config, attempt);
                tracing::debug!(attempt, ?backoff, error = %e, "retrying tool");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Exponential backoff with jitter:
/// `min(initial * multiplier^attempt, max) * random(1 - jitter, 1)`.
pub(crate) fn compute_backoff(config: &ToolRetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = base.min(config.max_backoff.as_secs_f64());

    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        rand::rng().random_range((1.0 - jitter)..=1.0)
    } else {
        1.0
    };
    Duration::from_secs_f64(capped * factor)
}
