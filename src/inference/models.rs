//! Model directory: which models does the service offer?

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::client::ChatTransport;
use super::dispatch::{UiEvent, UiScheduler};
use super::errors::RetrievalError;

/// Result of a model listing.
///
/// `models` is empty whenever `error` is set; the caller decides how to
/// present the error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelListing {
    pub models: Vec<String>,
    pub error: Option<RetrievalError>,
}

/// Lists model identifiers via `GET /v1/models`.
#[derive(Clone)]
pub struct ModelDirectory {
    transport: Arc<dyn ChatTransport>,
}

impl ModelDirectory {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }

    /// Fetch the model ids in the order the service returned them.
    pub async fn list_models(&self) -> ModelListing {
        let result = match self.transport.fetch_models().await {
            Ok(body) => parse_model_list(&body),
            Err(e) => Err(e),
        };

        match result {
            Ok(models) => {
                tracing::info!(count = models.len(), "model list loaded");
                ModelListing { models, error: None }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to retrieve models");
                ModelListing {
                    models: Vec::new(),
                    error: Some(e),
                }
            }
        }
    }

    /// Run [`list_models`](Self::list_models) on a worker task and post the
    /// result as [`UiEvent::ModelsListed`]. For callers on the UI context.
    pub fn refresh_in_background(&self, ui: Arc<dyn UiScheduler>) -> JoinHandle<()> {
        let directory = self.clone();
        tokio::spawn(async move {
            let listing = directory.list_models().await;
            ui.post(UiEvent::ModelsListed(listing));
        })
    }
}

/// Extract model ids from either accepted response shape.
///
/// - `{"object": "list", "data": [{"id": ...}, ...]}`
/// - `["id-a", "id-b", ...]`
pub fn parse_model_list(body: &Value) -> Result<Vec<String>, RetrievalError> {
    match body {
        Value::Object(obj) if obj.get("object").and_then(Value::as_str) == Some("list") => {
            let data = obj
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| format_error("list object has no 'data' array"))?;
            data.iter()
                .map(|entry| {
                    entry
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| format_error("model descriptor without string 'id'"))
                })
                .collect()
        }
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format_error("model list entry is not a string"))
            })
            .collect(),
        _ => Err(format_error("Unexpected response format")),
    }
}

fn format_error(reason: &str) -> RetrievalError {
    RetrievalError::FormatError {
        reason: reason.to_string(),
    }
}
