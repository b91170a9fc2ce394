//! Tool handler trait and the closure-backed implementation.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::{ToolError, ToolOutput};
use crate::provider::ToolDefinition;

/// A tool with a server-side executor.
///
/// Implement this for tools that carry state. For simple tools wrap a
/// closure with [`super::tool_fn`]. The trait is object-safe so handlers
/// can be stored as `Arc<dyn ToolHandler>`.
///
/// ```rust
/// use ai_stack::tool::{ToolError, ToolHandler, ToolOutput};
/// use ai_stack::{JsonSchema, ToolDefinition};
/// use serde_json::{Value, json};
/// use std::future::Future;
/// use std::pin::Pin;
///
/// struct Clock {
///     zone: String,
/// }
///
/// impl ToolHandler for Clock {
///     fn definition(&self) -> ToolDefinition {
///         ToolDefinition::new("clock", "Current time", JsonSchema::new(json!({"type": "object"})))
///     }
///
///     fn execute<'a>(
///         &'a self,
///         _input: Value,
///     ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
///         Box::pin(async move { Ok(ToolOutput::new(format!("12:00 {}", self.zone))) })
///     }
/// }
/// ```
pub trait ToolHandler: Send + Sync {
    /// The tool's definition (name, description, schema, approval gate).
    fn definition(&self) -> ToolDefinition;

    /// Runs the tool with already-parsed arguments.
    fn execute<'a>(
        &'a self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;
}

/// A tool handler backed by an async closure. Created by
/// [`super::tool_fn`].
pub struct FnToolHandler<F> {
    pub(crate) definition: ToolDefinition,
    pub(crate) handler: F,
}

impl<F> std::fmt::Debug for FnToolHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnToolHandler")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl<F, Fut, O> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, ToolError>> + Send + 'static,
    O: Into<ToolOutput> + Send + 'static,
{
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn execute<'a>(
        &'a self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>> {
        let fut = (self.handler)(input);
        Box::pin(async move { fut.await.map(Into::into) })
    }
}
