//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility. These types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Coarse classification of a [`RetrievalError`].
///
/// The UI layer switches on this instead of inspecting error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was rejected before any network call.
    Validation,
    /// The service could not be reached or answered with a non-2xx status.
    Transport,
    /// The service reported a failure inside the response stream.
    Server,
    /// A response had a shape we do not understand.
    Format,
}

/// Errors that can occur while talking to the inference service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    /// The request failed local validation.
    #[error("invalid request: {reason}")]
    Validation { reason: String },

    /// TCP/HTTP connection to the service failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The service did not respond within the configured timeout.
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// Non-2xx HTTP response.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// Reading the response body failed part-way through.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// A stream record carried an `error` field.
    #[error("server error: {message}")]
    ServerError { message: String },

    /// The model list response had an unrecognized shape.
    #[error("unexpected response format: {reason}")]
    FormatError { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl RetrievalError {
    /// Map this error onto the closed [`ErrorKind`] taxonomy.
    ///
    /// Configuration problems surface before any request is built, so they
    /// are reported as validation failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetrievalError::Validation { .. } | RetrievalError::ConfigError { .. } => {
                ErrorKind::Validation
            }
            RetrievalError::ConnectionFailed { .. }
            | RetrievalError::Timeout { .. }
            | RetrievalError::HttpError { .. }
            | RetrievalError::StreamError { .. } => ErrorKind::Transport,
            RetrievalError::ServerError { .. } => ErrorKind::Server,
            RetrievalError::FormatError { .. } => ErrorKind::Format,
        }
    }

    /// Build the error for a failed `reqwest` send.
    pub(crate) fn from_reqwest(endpoint: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RetrievalError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            RetrievalError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
