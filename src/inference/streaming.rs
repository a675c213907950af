//! NDJSON streaming response parser for `/api/chat`.
//!
//! Reads the response as a byte stream, splits it on `\n`, parses each line
//! as a [`ChatStreamRecord`], and folds the records into one answer. Lines
//! are consumed lazily; the body is never buffered whole.

use futures::stream::{self, BoxStream, Stream, StreamExt};

use super::errors::RetrievalError;
use super::types::{ChatStreamRecord, StreamChunk, DONE_REASON_LOAD};

/// Raw body chunks as delivered by the transport.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, RetrievalError>>;

// ─── Line splitter ───────────────────────────────────────────────────────────

/// Split a byte stream into text lines.
///
/// Partial lines are carried across chunk boundaries; a trailing line with no
/// newline is emitted when the body ends. Transport errors are forwarded and
/// end the stream.
pub fn ndjson_lines(bytes: ByteStream) -> impl Stream<Item = Result<String, RetrievalError>> {
    stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let text = String::from_utf8_lossy(&line).into_owned();
                    return Some((Ok(text), (bytes, buffer, false)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => return Some((Err(e), (bytes, buffer, true))),
                    None => {
                        if buffer.is_empty() {
                            return None;
                        }
                        let text = String::from_utf8_lossy(&buffer).into_owned();
                        buffer.clear();
                        return Some((Ok(text), (bytes, buffer, true)));
                    }
                }
            }
        },
    )
}

/// Parse one line into a [`StreamChunk`].
///
/// Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<StreamChunk>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let record: ChatStreamRecord = serde_json::from_str(trimmed)?;
    Ok(Some(record.into()))
}

// ─── Accumulation ────────────────────────────────────────────────────────────

/// What one request attempt produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Concatenated content, trimmed.
    pub text: String,
    /// `done_reason` of the final record, if any.
    pub done_reason: Option<String>,
    /// Lines that failed to parse and were skipped.
    pub skipped_lines: usize,
}

impl StreamOutcome {
    /// Empty answer because the model is still being loaded.
    pub fn is_loading(&self) -> bool {
        self.text.is_empty() && self.done_reason.as_deref() == Some(DONE_REASON_LOAD)
    }
}

/// Consume `bytes` until a `done` record or end of body.
///
/// Malformed lines are logged and skipped. A record carrying `error` aborts
/// with [`RetrievalError::ServerError`].
pub async fn collect_answer(bytes: ByteStream) -> Result<StreamOutcome, RetrievalError> {
    let mut lines = Box::pin(ndjson_lines(bytes));
    let mut buffer = String::new();
    let mut outcome = StreamOutcome::default();

    while let Some(line) = lines.next().await {
        let line = line?;
        let chunk = match parse_line(&line) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => continue,
            Err(e) => {
                outcome.skipped_lines += 1;
                tracing::warn!(error = %e, line = %line.trim(), "skipping malformed stream line");
                continue;
            }
        };

        if let Some(message) = chunk.error_message {
            return Err(RetrievalError::ServerError { message });
        }

        buffer.push_str(&chunk.content_fragment);

        if chunk.done_reason.is_some() {
            outcome.done_reason = chunk.done_reason;
        }
        if chunk.is_final {
            break;
        }
    }

    outcome.text = buffer.trim().to_string();
    Ok(outcome)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
