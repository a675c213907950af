//! Plain-text export of the Q&A history.

use std::io::Write;
use std::path::{Path, PathBuf};

use super::database::QaDatabase;
use super::errors::HistoryError;
use super::types::QaRecord;

const SEPARATOR_WIDTH: usize = 50;

/// Write `records` in the export layout.
pub fn export_records<W: Write>(records: &[QaRecord], out: &mut W) -> std::io::Result<()> {
    let separator = "-".repeat(SEPARATOR_WIDTH);
    for r in records {
        writeln!(out, "ID: {}", r.id)?;
        writeln!(out, "Model: {}", r.model)?;
        writeln!(out, "Topic: {}", r.topic)?;
        writeln!(out, "Question: {}", r.question)?;
        writeln!(out, "Answer: {}", r.answer.as_deref().unwrap_or(""))?;
        writeln!(out, "Timestamp: {}", r.timestamp)?;
        writeln!(out, "{separator}")?;
    }
    Ok(())
}

/// Export every record to `path` (UTF-8). Returns the number written.
pub fn export_to_file(db: &QaDatabase, path: &Path) -> Result<usize, HistoryError> {
    let records = db.all_records()?;
    let to_export_error = |e: std::io::Error| HistoryError::ExportError {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let file = std::fs::File::create(path).map_err(to_export_error)?;
    let mut writer = std::io::BufWriter::new(file);
    export_records(&records, &mut writer).map_err(to_export_error)?;
    writer.flush().map_err(to_export_error)?;

    tracing::info!(path = %path.display(), count = records.len(), "history exported");
    Ok(records.len())
}

/// File name used when the user does not pick one, e.g.
/// `qa_export_20240131_174502.txt`.
pub fn default_export_path(dir: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("qa_export_{stamp}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::types::NewQaRecord;
    use tempfile::TempDir;

    fn sample(id: i64, answer: Option<&str>) -> QaRecord {
        QaRecord {
            id,
            model: "llama3".into(),
            topic: "rust".into(),
            question: "What is Pin?".into(),
            answer: answer.map(str::to_string),
            timestamp: "2024-05-01 10:00:00".into(),
        }
    }

    #[test]
    fn test_export_layout() {
        let mut out = Vec::new();
        export_records(&[sample(1, Some("A pointer wrapper."))], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = format!(
            "ID: 1\nModel: llama3\nTopic: rust\nQuestion: What is Pin?\n\
             Answer: A pointer wrapper.\nTimestamp: 2024-05-01 10:00:00\n{}\n",
            "-".repeat(50)
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn test_export_missing_answer_is_blank() {
        let mut out = Vec::new();
        export_records(&[sample(2, None)], &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Answer: \n"));
    }

    #[test]
    fn test_export_to_file() {
        let tmp = TempDir::new().unwrap();
        let db = QaDatabase::open(":memory:").unwrap();
        for q in ["first", "second"] {
            db.insert_record(&NewQaRecord {
                model: "llama3".into(),
                topic: "t".into(),
                question: q.into(),
                answer: Some("ünïcödé".into()),
            })
            .unwrap();
        }

        let path = tmp.path().join("out.txt");
        assert_eq!(export_to_file(&db, &path).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let first = text.find("Question: first").unwrap();
        let second = text.find("Question: second").unwrap();
        assert!(first < second);
        assert!(text.contains("ünïcödé"));
    }

    #[test]
    fn test_export_to_missing_dir_fails() {
        let tmp = TempDir::new().unwrap();
        let db = QaDatabase::open(":memory:").unwrap();
        let err = export_to_file(&db, &tmp.path().join("nope").join("out.txt")).unwrap_err();
        assert!(matches!(err, HistoryError::ExportError { .. }));
    }

    #[test]
    fn test_default_export_path_shape() {
        let path = default_export_path(Path::new("/tmp"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("qa_export_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(name.len(), "qa_export_YYYYMMDD_HHMMSS.txt".len());
    }
}
