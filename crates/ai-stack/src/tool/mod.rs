//! Tool execution and the agent loop.
//!
//! # Architecture
//!
//! ```text
//!   ToolHandler      defines one server-side tool (schema + executor)
//!       │
//!   ToolRegistry     server and client tools by name; parses, validates, executes
//!       │
//!   agent_loop()     invoke → process → plan → execute, bounded by a LoopStrategy
//!   run_agent_loop() the same, without the event stream
//! ```
//!
//! A turn's finalized tool calls are planned before anything runs. Calls
//! to tools that need approval suspend until the consumer decides, and
//! calls to client tools suspend until the consumer supplies an output.
//! Either way the run ends with
//! [`TerminationReason::AwaitingClient`]; the next run picks the
//! decisions up from [`ClientState`] and resolves the pending calls
//! before invoking the model again.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ai_stack::tool::{AgentLoopConfig, ToolRegistry, max_iterations, run_agent_loop, tool_fn};
//! use ai_stack::{ChatMessage, ChatParams, JsonSchema, ToolDefinition};
//! use serde_json::{Value, json};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(provider: Arc<dyn ai_stack::DynProvider>) -> Result<(), ai_stack::LlmError> {
//! let mut registry = ToolRegistry::new();
//! registry.register(tool_fn(
//!     ToolDefinition::new("weather", "Current weather", JsonSchema::new(json!({
//!         "type": "object",
//!         "properties": {"city": {"type": "string"}},
//!         "required": ["city"]
//!     }))),
//!     |input: Value| async move { Ok(format!("Sunny in {}", input["city"])) },
//! ));
//!
//! let params = ChatParams {
//!     messages: vec![ChatMessage::user("Weather in Paris?")],
//!     ..Default::default()
//! };
//! let config = AgentLoopConfig {
//!     strategy: max_iterations(3),
//!     ..Default::default()
//! };
//! let result = run_agent_loop(
//!     provider,
//!     Arc::new(registry),
//!     params.into(),
//!     config,
//!     CancellationToken::new(),
//! )
//! .await?;
//! println!("{}", result.content);
//! # Ok(())
//! # }
//! ```

mod agent;
mod approval;
mod config;
mod error;
mod execution;
mod handler;
mod helpers;
mod loop_core;
mod output;
mod registry;
mod strategy;

pub use agent::{AgentLoopRequest, agent_loop, run_agent_loop};
pub use approval::{ClientState, ClientToolOutput, approval_id_for};
pub use config::{AgentLoopConfig, AgentLoopResult, FailurePolicy, TerminationReason};
pub use error::ToolError;
pub use handler::{FnToolHandler, ToolHandler};
pub use helpers::tool_fn;
pub use output::ToolOutput;
pub use registry::{ToolKind, ToolRegistry};
pub use strategy::{
    AgentLoopState, LoopStrategy, combine_strategies, max_iterations, until_finish_reason,
};
