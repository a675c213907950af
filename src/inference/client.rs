//! HTTP transport for the Ollama-compatible inference service.
//!
//! [`ChatTransport`] is the seam between the pipeline and the network: the
//! pipeline only ever sees a byte stream for `/api/chat` and a JSON value for
//! `/v1/models`. [`HttpTransport`] is the `reqwest` implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;

use super::errors::RetrievalError;
use super::streaming::ByteStream;
use super::types::ChatPayload;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Total request timeout for streaming calls.
///
/// A cold model can take minutes to produce its first token on CPU-only
/// machines, so the streaming client gets a much longer budget.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Network operations the inference components depend on.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// `POST /api/chat` and return the response body as a byte stream.
    ///
    /// Connection failures and non-2xx statuses are returned as errors before
    /// any body is read.
    async fn open_chat_stream(&self, payload: &ChatPayload) -> Result<ByteStream, RetrievalError>;

    /// `GET /v1/models` and return the decoded JSON body.
    async fn fetch_models(&self) -> Result<serde_json::Value, RetrievalError>;
}

// ─── HttpTransport ───────────────────────────────────────────────────────────

/// `reqwest`-backed transport. Each call issues its own request.
pub struct HttpTransport {
    /// Client for the model list (30s timeout).
    http: HttpClient,
    /// Client for chat streams (600s timeout).
    http_stream: HttpClient,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RetrievalError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RetrievalError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RetrievalError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_chat_stream(&self, payload: &ChatPayload) -> Result<ByteStream, RetrievalError> {
        let url = format!("{}/api/chat", self.base_url);

        tracing::debug!(
            url = %url,
            model = %payload.model,
            has_images = payload.messages.iter().any(|m| m.images.is_some()),
            "sending chat request"
        );

        let response = self
            .http_stream
            .post(&url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| RetrievalError::from_reqwest(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        let endpoint = url.clone();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| RetrievalError::StreamError {
                        reason: format!("stream read error from {endpoint}: {e}"),
                    })
            })
            .boxed())
    }

    async fn fetch_models(&self) -> Result<serde_json::Value, RetrievalError> {
        let url = format!("{}/v1/models", self.base_url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RetrievalError::from_reqwest(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::HttpError {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| {
                if e.is_decode() {
                    RetrievalError::FormatError {
                        reason: format!("model list is not valid JSON: {e}"),
                    }
                } else {
                    RetrievalError::StreamError {
                        reason: format!("failed to read model list from {url}: {e}"),
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let transport = HttpTransport::new("http://localhost:11434/").unwrap();
        assert_eq!(transport.base_url(), "http://localhost:11434");
    }

    /// Serve one canned HTTP response on a local port and return its URL.
    async fn one_shot_server(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            // Dropping the socket closes the connection.
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_truncated_model_list_body_is_transport_error() {
        let base = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n[\"llama",
        )
        .await;
        let err = HttpTransport::new(base).unwrap().fetch_models().await.unwrap_err();
        assert_eq!(err.kind(), crate::inference::ErrorKind::Transport, "{err}");
    }

    #[tokio::test]
    async fn test_invalid_json_model_list_is_format_error() {
        let base = one_shot_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 8\r\n\r\nnot json",
        )
        .await;
        let err = HttpTransport::new(base).unwrap().fetch_models().await.unwrap_err();
        assert_eq!(err.kind(), crate::inference::ErrorKind::Format, "{err}");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Port 9 (discard) is essentially never served on localhost.
        let transport = HttpTransport::new("http://127.0.0.1:9").unwrap();
        let err = transport.fetch_models().await.unwrap_err();
        assert_eq!(err.kind(), crate::inference::ErrorKind::Transport, "{err}");
    }
}
