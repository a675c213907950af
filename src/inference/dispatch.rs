//! Hand-off from worker tasks to the UI-owning loop.
//!
//! Workers never touch presentation state. They post [`UiEvent`]s through a
//! [`UiScheduler`]; the loop that owns the UI drains the matching
//! [`UiReceiver`] and applies them one at a time.

use tokio::sync::mpsc;
use uuid::Uuid;

use super::models::ModelListing;
use super::types::RetrievalResult;

/// A notification for the UI-owning context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Enter (`true`) or leave (`false`) the busy presentation state.
    BusyChanged { request_id: Uuid, busy: bool },
    /// Terminal result of one submission.
    Completed(Completion),
    /// A model listing finished on a worker task.
    ModelsListed(ModelListing),
}

/// Everything the UI needs to display and persist a finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub request_id: Uuid,
    pub model_id: String,
    pub topic: String,
    pub question: String,
    pub result: RetrievalResult,
}

/// Thread-safe "run this on the UI context" primitive.
pub trait UiScheduler: Send + Sync {
    /// Enqueue `event`. Must not block and must not run UI code inline.
    fn post(&self, event: UiEvent);
}

/// Receiving half, owned by the UI loop.
pub type UiReceiver = mpsc::UnboundedReceiver<UiEvent>;

/// Channel-backed [`UiScheduler`].
#[derive(Debug, Clone)]
pub struct UiQueue {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiScheduler for UiQueue {
    fn post(&self, event: UiEvent) {
        // The receiver is gone only when the UI loop has exited.
        if self.tx.send(event).is_err() {
            tracing::debug!("UI loop closed, dropping event");
        }
    }
}

/// Create a connected scheduler/receiver pair.
pub fn ui_channel() -> (UiQueue, UiReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiQueue { tx }, rx)
}
