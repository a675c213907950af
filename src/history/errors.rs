//! Q&A history error types.

use thiserror::Error;

/// Errors from the local Q&A store and its export.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// No record with the given id.
    #[error("record not found: {id}")]
    RecordNotFound { id: i64 },

    /// Input rejected before touching the database.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Writing the export file failed.
    #[error("export failed for {path}: {reason}")]
    ExportError { path: String, reason: String },
}

impl From<rusqlite::Error> for HistoryError {
    fn from(e: rusqlite::Error) -> Self {
        HistoryError::DatabaseError {
            reason: e.to_string(),
        }
    }
}
