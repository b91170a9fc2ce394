//! Tool output type.

use serde::Serialize;
use serde_json::Value;

use super::ToolError;

/// Output returned by a tool executor.
///
/// Models take tool results as text, so structured output is serialized
/// to JSON on the way in.
///
/// ```rust
/// use ai_stack::tool::ToolOutput;
/// use serde_json::json;
///
/// assert_eq!(ToolOutput::new("42").content, "42");
/// assert_eq!(ToolOutput::from(json!({"temp": 21})).content, r#"{"temp":21}"#);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// The content returned to the model.
    pub content: String,
}

impl ToolOutput {
    /// Creates an output with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Serializes `value` as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ToolError> {
        Ok(Self::new(serde_json::to_string(value)?))
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Value> for ToolOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => Self::new(s),
            other => Self::new(other.to_string()),
        }
    }
}
