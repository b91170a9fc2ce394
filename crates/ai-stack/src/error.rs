//! Unified error type for streaming, tool, and chat operations.
//!
//! Model adapters, connections, and the agent loop all map their failures
//! into [`LlmError`], so a chat client has a single type to surface in its
//! error slot regardless of where the failure started.
//!
//! # Retryability
//!
//! Transport and provider variants carry a `retryable` flag set by the
//! adapter from the upstream response (e.g. HTTP 429 or 503):
//!
//! ```rust
//! use ai_stack::LlmError;
//!
//! fn should_retry(err: &LlmError) -> bool {
//!     match err {
//!         LlmError::Http { retryable, .. } => *retryable,
//!         LlmError::Provider { retryable, .. } => *retryable,
//!         LlmError::Timeout { .. } => true,
//!         _ => false,
//!     }
//! }
//! ```

use serde_json::Value;

/// Code attached to provider errors that arrived as an `error` stream event
/// without a code of their own.
pub const STREAM_ERROR_CODE: &str = "stream_error";

/// The error type returned by every fallible operation in this crate.
///
/// Variants are `#[non_exhaustive]`; always include a wildcard arm.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// An HTTP-level failure (transport error, unexpected status code).
    ///
    /// `status` is `None` when no response was received at all.
    #[error("HTTP error (status={status:?}): {message}")]
    Http {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A human-readable description of the failure.
        message: String,
        /// Whether the caller should retry this request.
        retryable: bool,
    },

    /// The remote endpoint rejected the caller's credentials.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The request was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A provider-reported failure, including `error` stream events.
    #[error("Provider error ({code}): {message}")]
    Provider {
        /// Provider-defined error code (e.g. `"overloaded"`).
        code: String,
        /// Human-readable error description.
        message: String,
        /// Whether the caller should retry this request.
        retryable: bool,
    },

    /// A payload could not be parsed.
    #[error("Response format error: {message}")]
    ResponseFormat {
        /// What went wrong during parsing.
        message: String,
        /// The raw payload, for diagnostics.
        raw: String,
    },

    /// A value failed JSON Schema validation.
    #[error("Schema validation error: {message}")]
    SchemaValidation {
        /// Concatenated validation error messages.
        message: String,
        /// The schema the value was validated against.
        schema: Value,
        /// The value that failed validation.
        actual: Value,
    },

    /// Tool execution failed in a way the loop was configured to treat
    /// as fatal.
    #[error("Tool execution error ({tool_name}): {source}")]
    ToolExecution {
        /// The name of the tool that failed.
        tool_name: String,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The operation exceeded its deadline.
    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds elapsed before the timeout fired.
        elapsed_ms: u64,
    },

    /// A chat client already has a request in flight.
    ///
    /// Returned by `send_message` and `reload`; the second request is
    /// rejected, never queued.
    #[error("a request is already in flight for this conversation")]
    Busy,
}

impl LlmError {
    /// Returns `true` if the error is transient and the request may succeed on retry.
    ///
    /// ```rust
    /// use ai_stack::LlmError;
    ///
    /// assert!(LlmError::Timeout { elapsed_ms: 5000 }.is_retryable());
    /// assert!(!LlmError::Auth("bad key".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { retryable, .. } | Self::Provider { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Builds the error raised when a stream yields an `error` event.
    pub fn from_stream_error(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Provider {
            code: code.unwrap_or_else(|| STREAM_ERROR_CODE.to_owned()),
            message: message.into(),
            retryable: false,
        }
    }

    /// A short machine-readable code, used when the error is serialized
    /// back into an `error` stream event.
    pub fn code(&self) -> &str {
        match self {
            Self::Http { .. } => "http",
            Self::Auth(_) => "auth",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Provider { code, .. } => code,
            Self::ResponseFormat { .. } => "response_format",
            Self::SchemaValidation { .. } => "schema_validation",
            Self::ToolExecution { .. } => "tool_execution",
            Self::Timeout { .. } => "timeout",
            Self::Busy => "busy",
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ResponseFormat {
            message: err.to_string(),
            raw: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_http() {
        let err = LlmError::Http {
            status: Some(http::StatusCode::TOO_MANY_REQUESTS),
            message: "rate limited".into(),
            retryable: true,
        };
        let display = format!("{err}");
        assert!(display.contains("429"));
        assert!(display.contains("rate limited"));
    }

    #[test]
    fn test_error_display_provider() {
        let err = LlmError::Provider {
            code: "overloaded".into(),
            message: "server busy".into(),
            retryable: true,
        };
        let display = format!("{err}");
        assert!(display.contains("overloaded"));
        assert!(display.contains("server busy"));
    }

    #[test]
    fn test_error_display_busy() {
        assert!(format!("{}", LlmError::Busy).contains("already in flight"));
    }

    #[test]
    fn test_error_display_tool_execution() {
        let err = LlmError::ToolExecution {
            tool_name: "search".into(),
            source: Box::new(std::io::Error::other("boom")),
        };
        let display = format!("{err}");
        assert!(display.contains("search"));
        assert!(display.contains("boom"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(
            LlmError::Http {
                status: Some(http::StatusCode::SERVICE_UNAVAILABLE),
                message: "unavailable".into(),
                retryable: true,
            }
            .is_retryable()
        );
        assert!(
            !LlmError::Provider {
                code: "bad".into(),
                message: "nope".into(),
                retryable: false,
            }
            .is_retryable()
        );
        assert!(LlmError::Timeout { elapsed_ms: 10 }.is_retryable());
        assert!(!LlmError::Busy.is_retryable());
        assert!(!LlmError::InvalidRequest("x".into()).is_retryable());
    }

    #[test]
    fn test_from_stream_error_defaults_code() {
        let err = LlmError::from_stream_error("model crashed", None);
        assert!(matches!(
            &err,
            LlmError::Provider { code, message, retryable: false }
                if code == STREAM_ERROR_CODE && message == "model crashed"
        ));

        let err = LlmError::from_stream_error("slow down", Some("rate_limit".into()));
        assert_eq!(err.code(), "rate_limit");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<Value>("{bad").unwrap_err();
        let err: LlmError = json_err.into();
        assert!(matches!(err, LlmError::ResponseFormat { .. }));
        assert_eq!(err.code(), "response_format");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmError>();
    }
}
