//! HTTP connection configuration.

use std::time::Duration;

use http::HeaderMap;
use http::header::AUTHORIZATION;

/// Configuration for [`SseConnection`](crate::SseConnection).
///
/// Use struct update syntax with [`Default`]:
///
/// ```rust
/// use ai_stack_http::HttpConnectionConfig;
///
/// let config = HttpConnectionConfig {
///     url: "https://example.com/api/chat".into(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Default)]
pub struct HttpConnectionConfig {
    /// Endpoint that accepts the conversation and answers with SSE.
    pub url: String,
    /// Extra headers sent with every request.
    pub headers: HeaderMap,
    /// Request timeout. `None` uses reqwest's default.
    pub timeout: Option<Duration>,
    /// Pre-configured HTTP client for connection pooling.
    /// When `None`, a new client is created.
    pub client: Option<reqwest::Client>,
}

impl std::fmt::Debug for HttpConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| {
                let shown = if *name == AUTHORIZATION {
                    "[REDACTED]"
                } else {
                    value.to_str().unwrap_or("<binary>")
                };
                (name.as_str(), shown)
            })
            .collect();
        f.debug_struct("HttpConnectionConfig")
            .field("url", &self.url)
            .field("headers", &headers)
            .field("timeout", &self.timeout)
            .field("client", &self.client.as_ref().map(|_| "..."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_default_config() {
        let config = HttpConnectionConfig::default();
        assert!(config.url.is_empty());
        assert!(config.headers.is_empty());
        assert!(config.timeout.is_none());
        assert!(config.client.is_none());
    }

    #[test]
    fn test_debug_redacts_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer super-secret"));
        headers.insert("x-tenant", HeaderValue::from_static("acme"));
        let config = HttpConnectionConfig {
            url: "http://localhost/chat".into(),
            headers,
            ..Default::default()
        };
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("super-secret"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(debug_output.contains("acme"));
    }
}
