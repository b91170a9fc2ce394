//! Convenience constructors for tool handlers.

use std::future::Future;

use serde_json::Value;

use super::handler::FnToolHandler;
use super::{ToolError, ToolOutput};
use crate::provider::ToolDefinition;

/// Wraps an async closure as a [`ToolHandler`](super::ToolHandler).
///
/// ```rust
/// use ai_stack::tool::{ToolRegistry, tool_fn};
/// use ai_stack::{JsonSchema, ToolDefinition};
/// use serde_json::{Value, json};
///
/// let mut registry = ToolRegistry::new();
/// registry.register(tool_fn(
///     ToolDefinition::new(
///         "add",
///         "Add two numbers",
///         JsonSchema::new(json!({
///             "type": "object",
///             "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
///             "required": ["a", "b"]
///         })),
///     ),
///     |input: Value| async move {
///         let a = input["a"].as_f64().unwrap_or(0.0);
///         let b = input["b"].as_f64().unwrap_or(0.0);
///         Ok(format!("{}", a + b))
///     },
/// ));
/// assert!(registry.contains("add"));
/// ```
pub fn tool_fn<F, Fut, O>(definition: ToolDefinition, handler: F) -> FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    FnToolHandler {
        definition,
        handler,
    }
}
