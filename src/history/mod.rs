//! History — local record of question/answer exchanges.
//!
//! - SQLite store (`ollama_QA.db`) with insert, edit, delete, topic search
//! - Plain-text export

pub mod database;
pub mod errors;
pub mod export;
pub mod types;

pub use database::QaDatabase;
pub use errors::HistoryError;
pub use export::{default_export_path, export_to_file};
pub use types::{NewQaRecord, QaRecord};
