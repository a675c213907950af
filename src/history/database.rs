//! SQLite store for question/answer exchanges.
//!
//! Uses `rusqlite` in synchronous mode. The database is owned by the UI loop;
//! worker tasks never write to it.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::errors::HistoryError;
use super::types::{NewQaRecord, QaRecord};

/// Default database file name inside the data directory.
pub const DEFAULT_DB_FILE: &str = "ollama_QA.db";

const SELECT_COLUMNS: &str = "SELECT id, model, topic, question, answer, timestamp FROM questions";

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite handle for the Q&A history.
pub struct QaDatabase {
    conn: Connection,
}

impl QaDatabase {
    /// Open (or create) the database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, HistoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), HistoryError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                model TEXT NOT NULL,
                topic TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            ",
        )?;
        Ok(())
    }

    // ─── Writes ─────────────────────────────────────────────────────────

    /// Store a new exchange and return its id.
    pub fn insert_record(&self, record: &NewQaRecord) -> Result<i64, HistoryError> {
        self.conn.execute(
            "INSERT INTO questions (model, topic, question, answer) VALUES (?1, ?2, ?3, ?4)",
            params![record.model, record.topic, record.question, record.answer],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite the fields of record `id`.
    pub fn update_record(&self, id: i64, record: &NewQaRecord) -> Result<(), HistoryError> {
        record.validate_for_edit()?;
        let changed = self.conn.execute(
            "UPDATE questions SET model = ?1, topic = ?2, question = ?3, answer = ?4
             WHERE id = ?5",
            params![
                record.model.trim(),
                record.topic.trim(),
                record.question.trim(),
                record.answer.as_deref().map(str::trim),
                id
            ],
        )?;
        if changed == 0 {
            return Err(HistoryError::RecordNotFound { id });
        }
        Ok(())
    }

    /// Delete record `id`.
    pub fn delete_record(&self, id: i64) -> Result<(), HistoryError> {
        let changed = self
            .conn
            .execute("DELETE FROM questions WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(HistoryError::RecordNotFound { id });
        }
        Ok(())
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    pub fn get_record(&self, id: i64) -> Result<Option<QaRecord>, HistoryError> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records, newest first.
    pub fn list_records(&self) -> Result<Vec<QaRecord>, HistoryError> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY id DESC"), params![])
    }

    /// Records whose topic contains `fragment`.
    pub fn search_by_topic(&self, fragment: &str) -> Result<Vec<QaRecord>, HistoryError> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Err(HistoryError::InvalidInput {
                reason: "Please enter a topic to search.".into(),
            });
        }
        self.query(
            &format!("{SELECT_COLUMNS} WHERE topic LIKE ?1 ORDER BY id ASC"),
            params![format!("%{fragment}%")],
        )
    }

    /// All records in insertion order (used by export).
    pub fn all_records(&self) -> Result<Vec<QaRecord>, HistoryError> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY id ASC"), params![])
    }

    pub fn record_count(&self) -> Result<usize, HistoryError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<QaRecord>, HistoryError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<QaRecord> {
    Ok(QaRecord {
        id: row.get(0)?,
        model: row.get(1)?,
        topic: row.get(2)?,
        question: row.get(3)?,
        answer: row.get(4)?,
        timestamp: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> QaDatabase {
        QaDatabase::open(":memory:").unwrap()
    }

    fn new_record(topic: &str, question: &str, answer: &str) -> NewQaRecord {
        NewQaRecord {
            model: "llama3".into(),
            topic: topic.into(),
            question: question.into(),
            answer: Some(answer.into()),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = test_db();
        let id = db
            .insert_record(&new_record("rust", "What is Send?", "A marker trait."))
            .unwrap();

        let record = db.get_record(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.model, "llama3");
        assert_eq!(record.question, "What is Send?");
        assert_eq!(record.answer.as_deref(), Some("A marker trait."));
        assert!(!record.timestamp.is_empty());
    }

    #[test]
    fn test_get_missing_record() {
        assert!(test_db().get_record(42).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let db = test_db();
        let first = db.insert_record(&new_record("a", "q1", "a1")).unwrap();
        let second = db.insert_record(&new_record("b", "q2", "a2")).unwrap();

        let ids: Vec<i64> = db.list_records().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second, first]);

        let ids: Vec<i64> = db.all_records().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_search_by_topic_partial_match() {
        let db = test_db();
        db.insert_record(&new_record("rust async", "q1", "a1")).unwrap();
        db.insert_record(&new_record("python", "q2", "a2")).unwrap();
        db.insert_record(&new_record("trusty tools", "q3", "a3")).unwrap();

        let found: Vec<String> = db
            .search_by_topic("rust")
            .unwrap()
            .into_iter()
            .map(|r| r.topic)
            .collect();
        assert_eq!(found, vec!["rust async", "trusty tools"]);
    }

    #[test]
    fn test_search_empty_fragment_rejected() {
        let err = test_db().search_by_topic("  ").unwrap_err();
        assert!(matches!(err, HistoryError::InvalidInput { .. }));
    }

    #[test]
    fn test_update_record() {
        let db = test_db();
        let id = db.insert_record(&new_record("rust", "q", "old")).unwrap();

        db.update_record(id, &new_record(" borrowck ", "q", "new answer "))
            .unwrap();
        let record = db.get_record(id).unwrap().unwrap();
        assert_eq!(record.topic, "borrowck");
        assert_eq!(record.answer.as_deref(), Some("new answer"));
    }

    #[test]
    fn test_update_missing_record() {
        let err = test_db()
            .update_record(7, &new_record("rust", "q", "a"))
            .unwrap_err();
        assert!(matches!(err, HistoryError::RecordNotFound { id: 7 }));
    }

    #[test]
    fn test_update_rejects_empty_topic() {
        let db = test_db();
        let id = db.insert_record(&new_record("rust", "q", "a")).unwrap();
        let err = db.update_record(id, &new_record("", "q", "a")).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidInput { .. }));
    }

    #[test]
    fn test_delete_record() {
        let db = test_db();
        let id = db.insert_record(&new_record("rust", "q", "a")).unwrap();
        assert_eq!(db.record_count().unwrap(), 1);

        db.delete_record(id).unwrap();
        assert_eq!(db.record_count().unwrap(), 0);
        assert!(matches!(
            db.delete_record(id).unwrap_err(),
            HistoryError::RecordNotFound { .. }
        ));
    }

    #[test]
    fn test_empty_topic_allowed_on_insert() {
        let db = test_db();
        let id = db.insert_record(&new_record("", "q", "a")).unwrap();
        assert_eq!(db.get_record(id).unwrap().unwrap().topic, "");
    }
}
