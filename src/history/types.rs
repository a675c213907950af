//! Q&A record types.

use super::errors::HistoryError;
use crate::inference::types::UNSELECTED_MODEL;

/// A stored question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaRecord {
    pub id: i64,
    pub model: String,
    pub topic: String,
    pub question: String,
    pub answer: Option<String>,
    /// SQLite `CURRENT_TIMESTAMP` text (UTC, `YYYY-MM-DD HH:MM:SS`).
    pub timestamp: String,
}

/// Fields for inserting or rewriting a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQaRecord {
    pub model: String,
    pub topic: String,
    pub question: String,
    pub answer: Option<String>,
}

impl NewQaRecord {
    /// Validation applied when a user edits an existing record.
    ///
    /// Edits are stricter than inserts: an edited record must keep a topic.
    pub fn validate_for_edit(&self) -> Result<(), HistoryError> {
        let model = self.model.trim();
        if model.is_empty() || model == UNSELECTED_MODEL {
            return Err(HistoryError::InvalidInput {
                reason: "Please select a model.".into(),
            });
        }
        if self.topic.trim().is_empty() || self.question.trim().is_empty() {
            return Err(HistoryError::InvalidInput {
                reason: "Topic and Question fields cannot be empty.".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, topic: &str, question: &str) -> NewQaRecord {
        NewQaRecord {
            model: model.into(),
            topic: topic.into(),
            question: question.into(),
            answer: None,
        }
    }

    #[test]
    fn test_validate_for_edit() {
        assert!(record("llama3", "rust", "why?").validate_for_edit().is_ok());
        assert!(record(UNSELECTED_MODEL, "rust", "why?").validate_for_edit().is_err());
        assert!(record("llama3", " ", "why?").validate_for_edit().is_err());
        assert!(record("llama3", "rust", "").validate_for_edit().is_err());
    }
}
