//! Model adapter trait and request types.
//!
//! - **[`Provider`]** is what a model adapter implements. It uses native
//!   async-fn-in-traits, so implementations are plain `async fn`s. Only
//!   [`stream`](Provider::stream) is required; the non-streaming
//!   [`generate`](Provider::generate) collects the stream through a
//!   [`StreamProcessor`](crate::processor::StreamProcessor).
//!
//! - **[`DynProvider`]** is the object-safe mirror with boxed futures. A
//!   blanket impl covers every `Provider`, so the agent loop can hold an
//!   `Arc<dyn DynProvider>`.
//!
//! Cancellation is not part of the adapter signature: the loop races the
//! returned stream against its cancellation token and drops it, which
//! tears down whatever the adapter had in flight.

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChatMessage, ChatResponse};
use crate::error::LlmError;
use crate::processor::{ProcessorResult, StreamProcessor};
use crate::stream::ChatStream;

/// A model adapter.
///
/// `Provider` is not object-safe because its methods return
/// `impl Future`. Use [`DynProvider`] behind `dyn`.
pub trait Provider: Send + Sync {
    /// Starts a model turn and returns its event stream.
    ///
    /// The stream is finite and cannot be restarted.
    fn stream(
        &self,
        params: &ChatParams,
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send;

    /// Runs a model turn to completion.
    ///
    /// The default implementation collects [`stream`](Self::stream).
    fn generate(
        &self,
        params: &ChatParams,
    ) -> impl Future<Output = Result<ChatResponse, LlmError>> + Send {
        async move {
            let stream = self.stream(params).await?;
            StreamProcessor::new(())
                .process(stream)
                .await
                .map(ProcessorResult::into_response)
        }
    }

    /// Describes this adapter.
    fn metadata(&self) -> ProviderMetadata;
}

/// Object-safe counterpart of [`Provider`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ai_stack::{ChatMessage, ChatParams, DynProvider};
///
/// async fn ask(provider: Arc<dyn DynProvider>, question: &str) -> Result<String, ai_stack::LlmError> {
///     let params = ChatParams {
///         messages: vec![ChatMessage::user(question)],
///         ..Default::default()
///     };
///     Ok(provider.generate_boxed(&params).await?.content)
/// }
/// ```
pub trait DynProvider: Send + Sync {
    /// Boxed-future version of [`Provider::stream`].
    fn stream_boxed<'a>(
        &'a self,
        params: &'a ChatParams,
    ) -> Pin<Box<dyn Future<Output = Result<ChatStream, LlmError>> + Send + 'a>>;

    /// Boxed-future version of [`Provider::generate`].
    fn generate_boxed<'a>(
        &'a self,
        params: &'a ChatParams,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, LlmError>> + Send + 'a>>;

    /// Describes this adapter.
    fn metadata(&self) -> ProviderMetadata;
}

impl<T: Provider> DynProvider for T {
    fn stream_boxed<'a>(
        &'a self,
        params: &'a ChatParams,
    ) -> Pin<Box<dyn Future<Output = Result<ChatStream, LlmError>> + Send + 'a>> {
        Box::pin(self.stream(params))
    }

    fn generate_boxed<'a>(
        &'a self,
        params: &'a ChatParams,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, LlmError>> + Send + 'a>> {
        Box::pin(self.generate(params))
    }

    fn metadata(&self) -> ProviderMetadata {
        Provider::metadata(self)
    }
}

/// Identifies an adapter instance in logs and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Adapter name (e.g. `"openai"`).
    pub name: Cow<'static, str>,
    /// Model identifier.
    pub model: String,
}

/// A model request.
///
/// ```rust
/// use ai_stack::{ChatMessage, ChatParams};
///
/// let params = ChatParams {
///     messages: vec![ChatMessage::user("Hello")],
///     max_tokens: Some(256),
///     ..Default::default()
/// };
/// ```
///
/// `timeout` is a transport concern and is skipped during serialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatParams {
    /// The conversation history.
    pub messages: Vec<ChatMessage>,
    /// Tools the model may call.
    pub tools: Option<Vec<ToolDefinition>>,
    /// System prompt, for adapters that take it separately.
    pub system: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Adapter-specific options.
    pub metadata: HashMap<String, Value>,
    /// Per-request timeout.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

/// Decides whether a failed tool attempt is retried. Receives the error
/// message.
pub type RetryPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Retry policy for a tool executor.
///
/// ```rust
/// use ai_stack::ToolRetryConfig;
/// use std::time::Duration;
///
/// let config = ToolRetryConfig {
///     max_retries: 2,
///     initial_backoff: Duration::from_millis(50),
///     ..Default::default()
/// };
/// assert_eq!(config.backoff_multiplier, 2.0);
/// ```
#[derive(Clone)]
pub struct ToolRetryConfig {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 100ms.
    pub initial_backoff: Duration,
    /// Upper bound on any delay. Default: 5s.
    pub max_backoff: Duration,
    /// Growth factor per retry. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomized away, 0.0 to 1.0. Default: 0.5.
    pub jitter: f64,
    /// Only errors matching this predicate are retried. `None` retries all.
    pub retry_if: Option<RetryPredicate>,
}

impl Default for ToolRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: 0.5,
            retry_if: None,
        }
    }
}

impl std::fmt::Debug for ToolRetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRetryConfig")
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("has_retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl PartialEq for ToolRetryConfig {
    fn eq(&self, other: &Self) -> bool {
        self.max_retries == other.max_retries
            && self.initial_backoff == other.initial_backoff
            && self.max_backoff == other.max_backoff
            && self.backoff_multiplier == other.backoff_multiplier
            && self.jitter == other.jitter
            && self.retry_if.is_some() == other.retry_if.is_some()
    }
}

/// A tool the model can call.
///
/// The same definition serves as the model-facing schema and as the
/// local argument validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Name matched against [`ToolCall::name`](crate::ToolCall::name).
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema of the expected input.
    pub parameters: JsonSchema,
    /// Whether a user must approve each call before it runs.
    #[serde(default)]
    pub needs_approval: bool,
    /// Retry policy for the executor.
    #[serde(skip)]
    pub retry: Option<ToolRetryConfig>,
}

impl ToolDefinition {
    /// A definition with no approval gate and no retries.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: JsonSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            needs_approval: false,
            retry: None,
        }
    }

    /// Requires approval before every call.
    #[must_use]
    pub fn with_approval(mut self) -> Self {
        self.needs_approval = true;
        self
    }
}

/// A JSON Schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchema(Value);

impl JsonSchema {
    /// Wraps a raw schema value.
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    /// The underlying value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Derives a schema from a type implementing [`schemars::JsonSchema`].
    ///
    /// Requires the `schema` feature (enabled by default).
    #[cfg(feature = "schema")]
    pub fn from_type<T: schemars::JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = schemars::schema_for!(T);
        Ok(Self(serde_json::to_value(schema)?))
    }

    /// Validates `value`, returning [`LlmError::SchemaValidation`] with
    /// every violation joined by `"; "`, or [`LlmError::InvalidRequest`]
    /// if the schema itself is malformed.
    ///
    /// Requires the `schema` feature (enabled by default).
    #[cfg(feature = "schema")]
    pub fn validate(&self, value: &Value) -> Result<(), LlmError> {
        let validator = jsonschema::validator_for(&self.0)
            .map_err(|e| LlmError::InvalidRequest(format!("invalid JSON schema: {e}")))?;
        let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::SchemaValidation {
                message: errors.join("; "),
                schema: self.0.clone(),
                actual: value.clone(),
            })
        }
    }
}
