//! Client side: POST the conversation, decode the SSE answer.

use std::future::Future;
use std::pin::Pin;

use ai_stack::client::{ConnectRequest, ConnectionAdapter};
use ai_stack::error::LlmError;
use ai_stack::sse::decode_sse;
use ai_stack::stream::ChatStream;
use futures::StreamExt;
use http::StatusCode;
use http::header::{ACCEPT, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::HttpConnectionConfig;

/// A [`ConnectionAdapter`] that talks to a remote endpoint over HTTP.
///
/// Each run POSTs `{ messages, data, conversationId }` as JSON and reads
/// the response body as SSE. Cancelling the run drops the response, which
/// closes the connection.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ai_stack::client::{ChatClient, ChatClientOptions};
/// use ai_stack_http::{HttpConnectionConfig, SseConnection};
///
/// # fn example() -> Result<(), ai_stack::LlmError> {
/// let connection = SseConnection::new(HttpConnectionConfig {
///     url: "https://example.com/api/chat".into(),
///     ..Default::default()
/// })?;
/// let client = ChatClient::new(Arc::new(connection), ChatClientOptions::default());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SseConnection {
    config: HttpConnectionConfig,
    client: reqwest::Client,
}

impl SseConnection {
    /// Creates a connection from configuration.
    ///
    /// If `config.client` is `Some`, that client is reused. Otherwise a new
    /// client is built with the configured timeout.
    pub fn new(config: HttpConnectionConfig) -> Result<Self, LlmError> {
        let client = match &config.client {
            Some(client) => client.clone(),
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = config.timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build().map_err(|e| LlmError::InvalidRequest(format!(
                    "failed to build HTTP client: {e}"
                )))?
            }
        };
        Ok(Self { config, client })
    }

    #[instrument(skip_all, fields(url = %self.config.url, conversation = %request.conversation_id))]
    async fn open(&self, request: ConnectRequest, cancel: CancellationToken) -> Result<ChatStream, LlmError> {
        let send = self
            .client
            .post(&self.config.url)
            .headers(self.config.headers.clone())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&request)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("request cancelled before response");
                return Ok(empty_stream());
            }
            response = send => response.map_err(|e| self.convert_send_error(&e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(%status, "request cancelled while reading error body");
                    return Ok(empty_stream());
                }
                body = response.text() => body.unwrap_or_default(),
            };
            tracing::warn!(%status, "chat endpoint rejected request");
            return Err(convert_status(status, body));
        }

        let stream = decode_sse(response.bytes_stream()).take_until(cancel.cancelled_owned());
        Ok(Box::pin(stream))
    }

    fn convert_send_error(&self, e: &reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                elapsed_ms: self
                    .config
                    .timeout
                    .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            }
        } else {
            LlmError::Http {
                status: e.status(),
                message: e.to_string(),
                retryable: e.is_connect(),
            }
        }
    }
}

fn empty_stream() -> ChatStream {
    Box::pin(futures::stream::empty::<Result<_, LlmError>>())
}

/// Maps a non-success status to an error.
fn convert_status(status: StatusCode, body: String) -> LlmError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth(message),
        _ => LlmError::Http {
            status: Some(status),
            message,
            retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        },
    }
}

impl ConnectionAdapter for SseConnection {
    fn connect<'a>(
        &'a self,
        request: ConnectRequest,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatStream, LlmError>> + Send + 'a>> {
        Box::pin(self.open(request, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_status() {
        assert!(matches!(
            convert_status(StatusCode::UNAUTHORIZED, String::new()),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            convert_status(StatusCode::FORBIDDEN, "nope".into()),
            LlmError::Auth(m) if m == "nope"
        ));

        let err = convert_status(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(err.is_retryable());
        let err = convert_status(StatusCode::BAD_GATEWAY, String::new());
        assert!(err.is_retryable());
        let err = convert_status(StatusCode::BAD_REQUEST, "bad body".into());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad body"));
    }

    #[test]
    fn test_new_reuses_client() {
        let connection = SseConnection::new(HttpConnectionConfig {
            url: "http://localhost/chat".into(),
            client: Some(reqwest::Client::new()),
            ..Default::default()
        });
        assert!(connection.is_ok());
    }
}
