//! Tool error type.

/// Error returned by a tool executor.
///
/// The message becomes the content of an error tool result, so the model
/// sees it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable description.
    pub message: String,
}

impl ToolError {
    /// Creates a tool error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}
