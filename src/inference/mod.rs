//! Inference — talks to a locally hosted, Ollama-compatible model service.
//!
//! This module handles all communication with the service:
//! - Model listing (`GET /v1/models`, two accepted response shapes)
//! - Streaming chat (`POST /api/chat`, NDJSON)
//! - The answer pipeline: validation, streaming, load-retry, UI hand-off
//! - Configuration loading from `config.yaml`
//!
//! Nothing in here touches presentation state. Results travel to the
//! UI-owning loop as [`UiEvent`]s.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{ChatTransport, HttpTransport};
pub use config::AppConfig;
pub use dispatch::{ui_channel, Completion, UiEvent, UiQueue, UiReceiver, UiScheduler};
pub use errors::{ErrorKind, RetrievalError};
pub use models::{ModelDirectory, ModelListing};
pub use pipeline::{AnswerPipeline, RetryPolicy};
pub use types::{ChatRequest, RetrievalResult, StreamChunk};
