//! Shared types for the inference client.
//!
//! Request-side types mirror the Ollama `/api/chat` body; response-side types
//! mirror one NDJSON record of its streamed reply.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::ErrorKind;

/// Value the model selector shows before the user picks a model.
pub const UNSELECTED_MODEL: &str = "Select Model";

/// `done_reason` reported while the service is still loading the model.
pub const DONE_REASON_LOAD: &str = "load";

/// Shown when the model is still loading after every retry.
pub const LOADING_PLACEHOLDER: &str = "Model is currently loading. Please try again shortly.";

/// Shown when the stream finished without any content.
pub const NO_ANSWER_PLACEHOLDER: &str = "No answer returned by the server.";

// ─── Request Types ───────────────────────────────────────────────────────────

/// One question, as captured from the form when the user hits Ask.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Correlates UI events with the submission that produced them.
    pub request_id: Uuid,
    pub model_id: String,
    pub topic: String,
    pub question: String,
    /// Raw attachment bytes; only set for multimodal models.
    pub attachment: Option<Vec<u8>>,
}

impl ChatRequest {
    pub fn new(
        model_id: impl Into<String>,
        topic: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            model_id: model_id.into(),
            topic: topic.into(),
            question: question.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, bytes: Vec<u8>) -> Self {
        self.attachment = Some(bytes);
        self
    }
}

/// Message role. Only `user` is ever sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message in the request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64-encoded images for multimodal models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatPayload {
    /// Build the single-turn payload for `request`.
    pub fn from_request(request: &ChatRequest) -> Self {
        let images = request
            .attachment
            .as_ref()
            .map(|bytes| vec![BASE64.encode(bytes)]);

        Self {
            model: request.model_id.clone(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: request.question.clone(),
                images,
            }],
        }
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Raw NDJSON record from the `/api/chat` stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatStreamRecord {
    #[serde(default)]
    pub message: Option<RecordMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `message` object within a stream record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// One parsed unit of the streamed response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    /// Text to append (may be empty).
    pub content_fragment: String,
    /// Marks the end of the stream.
    pub is_final: bool,
    pub done_reason: Option<String>,
    /// Set when the service signals a failure.
    pub error_message: Option<String>,
}

impl From<ChatStreamRecord> for StreamChunk {
    fn from(record: ChatStreamRecord) -> Self {
        Self {
            content_fragment: record
                .message
                .and_then(|m| m.content)
                .unwrap_or_default(),
            is_final: record.done,
            done_reason: record.done_reason.filter(|r| !r.is_empty()),
            error_message: record.error,
        }
    }
}

/// Terminal outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalResult {
    Answer(String),
    Failure { kind: ErrorKind, message: String },
}

impl RetrievalResult {
    /// The answer text, if this is a success.
    pub fn answer(&self) -> Option<&str> {
        match self {
            RetrievalResult::Answer(text) => Some(text),
            RetrievalResult::Failure { .. } => None,
        }
    }
}

/// Truncate `s` to at most `max_bytes`, backing off to a char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
