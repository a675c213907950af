//! Line-oriented front end.
//!
//! [`ConsoleApp`] is the UI-owning context: it holds the question form, the
//! busy flag and the Q&A database. [`ConsoleApp::run`] multiplexes stdin
//! lines and [`UiEvent`]s on one `tokio::select!` loop, so every mutation of
//! that state happens in one place. Worker tasks only ever post events.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use uuid::Uuid;

use super::{parse_command, Command, HELP_TEXT};
use crate::history::{
    default_export_path, export_to_file, HistoryError, NewQaRecord, QaDatabase, QaRecord,
};
use crate::inference::types::{truncate_utf8, UNSELECTED_MODEL};
use crate::inference::{
    AnswerPipeline, AppConfig, ChatRequest, ChatTransport, Completion, ErrorKind,
    ModelDirectory, ModelListing, RetrievalResult, UiEvent, UiQueue, UiReceiver, UiScheduler,
};

/// Question prefix width in record listings.
const LIST_QUESTION_BYTES: usize = 60;

/// Whether the loop keeps reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// A file attached to the next question.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// The editable fields of the question form.
#[derive(Debug, Clone, Default)]
pub struct Form {
    /// `None` until a model is selected.
    pub model: Option<String>,
    pub topic: String,
    pub question: String,
    pub answer: String,
    pub attachment: Option<Attachment>,
}

// ─── App ─────────────────────────────────────────────────────────────────────

pub struct ConsoleApp<W: Write> {
    config: AppConfig,
    db: QaDatabase,
    pipeline: AnswerPipeline,
    directory: ModelDirectory,
    ui: Arc<dyn UiScheduler>,
    /// Last successful model listing, in service order.
    models: Vec<String>,
    /// A listing is running on a worker task.
    listing_models: bool,
    form: Form,
    /// Request whose answer is pending. New questions are refused while set.
    in_flight: Option<Uuid>,
    export_dir: PathBuf,
    out: W,
}

impl<W: Write> ConsoleApp<W> {
    pub fn new(
        config: AppConfig,
        db: QaDatabase,
        transport: Arc<dyn ChatTransport>,
        ui: UiQueue,
        out: W,
    ) -> Self {
        let ui: Arc<dyn UiScheduler> = Arc::new(ui);
        Self {
            config,
            db,
            pipeline: AnswerPipeline::new(Arc::clone(&transport), Arc::clone(&ui)),
            directory: ModelDirectory::new(transport),
            ui,
            models: Vec::new(),
            listing_models: false,
            form: Form::default(),
            in_flight: None,
            export_dir: PathBuf::from("."),
            out,
        }
    }

    /// Directory used by `/export` when no path is given.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_listing_models(&self) -> bool {
        self.listing_models
    }

    /// Read commands from `input` until `/quit` or end of input.
    ///
    /// At end of input a pending answer or model listing is still waited
    /// for, so piped questions get their answers printed and saved.
    pub async fn run<R>(mut self, input: R, mut events: UiReceiver) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        writeln!(
            self.out,
            "Ollama Desk ({}). Type /help for commands.",
            self.config.base_url()
        )?;
        self.refresh_models()?;

        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if self.handle_line(&line).await? == Flow::Quit {
                            break;
                        }
                    }
                    None => {
                        self.drain_pending(&mut events).await?;
                        break;
                    }
                },
                Some(event) = events.recv() => self.apply_event(event)?,
            }
        }

        tracing::info!("console loop finished");
        Ok(())
    }

    async fn drain_pending(&mut self, events: &mut UiReceiver) -> std::io::Result<()> {
        while self.in_flight.is_some() || self.listing_models {
            match events.recv().await {
                Some(event) => self.apply_event(event)?,
                None => break,
            }
        }
        Ok(())
    }

    // ─── Input ───────────────────────────────────────────────────────────

    /// Parse and execute one input line.
    pub async fn handle_line(&mut self, line: &str) -> std::io::Result<Flow> {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(e) => {
                writeln!(self.out, "{e}")?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            Command::Empty => {}
            Command::Ask(question) => self.ask(question)?,
            Command::Models => self.refresh_models()?,
            Command::SelectModel(choice) => self.select_model(&choice)?,
            Command::Topic(topic) => {
                self.form.topic = topic;
                writeln!(self.out, "Topic: {}", self.form.topic)?;
            }
            Command::Answer(answer) => self.form.answer = answer,
            Command::Attach(path) => self.attach(path).await?,
            Command::Detach => {
                if self.form.attachment.take().is_some() {
                    writeln!(self.out, "Attachment removed.")?;
                }
            }
            Command::List => {
                let records = self.db.list_records();
                self.print_records(records)?;
            }
            Command::Search(fragment) => {
                let records = self.db.search_by_topic(&fragment);
                self.print_records(records)?;
            }
            Command::Show(id) => self.show(id)?,
            Command::Edit(id) => self.edit(id)?,
            Command::Delete(id) => match self.db.delete_record(id) {
                Ok(()) => writeln!(self.out, "Record {id} deleted.")?,
                Err(e) => self.report_history_error(e)?,
            },
            Command::Export(path) => self.export(path)?,
            Command::Help => writeln!(self.out, "{HELP_TEXT}")?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn ask(&mut self, question: String) -> std::io::Result<()> {
        if self.in_flight.is_some() {
            writeln!(
                self.out,
                "Still waiting for the previous answer. Ask again once it arrives."
            )?;
            return Ok(());
        }

        self.form.question = question;
        self.form.answer.clear();

        let model = self
            .form
            .model
            .clone()
            .unwrap_or_else(|| UNSELECTED_MODEL.to_string());
        let mut request =
            ChatRequest::new(model, self.form.topic.clone(), self.form.question.clone());
        if let Some(attachment) = &self.form.attachment {
            request = request.with_attachment(attachment.bytes.clone());
        }

        let request_id = request.request_id;
        match self.pipeline.submit(request) {
            Ok(_) => self.in_flight = Some(request_id),
            Err(e) => writeln!(self.out, "Input error: {e}")?,
        }
        Ok(())
    }

    /// Start a model listing on a worker; the result arrives as
    /// [`UiEvent::ModelsListed`].
    fn refresh_models(&mut self) -> std::io::Result<()> {
        if self.listing_models {
            return writeln!(self.out, "Model list is already being refreshed.");
        }
        self.listing_models = true;
        self.directory.refresh_in_background(Arc::clone(&self.ui));
        Ok(())
    }

    fn show_models(&mut self, listing: ModelListing) -> std::io::Result<()> {
        self.listing_models = false;
        if let Some(e) = listing.error {
            writeln!(self.out, "Error: failed to retrieve models: {e}")?;
        }
        self.models = listing.models;

        if self.models.is_empty() {
            return writeln!(self.out, "No models available.");
        }
        writeln!(self.out, "Models:")?;
        for (i, model) in self.models.iter().enumerate() {
            let marker = if self.form.model.as_deref() == Some(model.as_str()) {
                '*'
            } else {
                ' '
            };
            writeln!(self.out, " {marker}{:>3}. {model}", i + 1)?;
        }
        Ok(())
    }

    fn select_model(&mut self, choice: &str) -> std::io::Result<()> {
        let selected = match choice.parse::<usize>() {
            Ok(n) if (1..=self.models.len()).contains(&n) => Some(self.models[n - 1].clone()),
            _ if choice == UNSELECTED_MODEL => None,
            _ if self.models.is_empty() || self.models.iter().any(|m| m == choice) => {
                Some(choice.to_string())
            }
            _ => {
                writeln!(self.out, "Unknown model: {choice} (see /models)")?;
                return Ok(());
            }
        };

        let multimodal = selected
            .as_deref()
            .is_some_and(|m| self.config.is_multimodal(m));
        if !multimodal && self.form.attachment.take().is_some() {
            writeln!(self.out, "Attachment removed: the model does not accept files.")?;
        }

        tracing::info!(model = ?selected, "model selected");
        match &selected {
            Some(model) => writeln!(self.out, "Model: {model}")?,
            None => writeln!(self.out, "No model selected.")?,
        }
        self.form.model = selected;
        Ok(())
    }

    async fn attach(&mut self, path: PathBuf) -> std::io::Result<()> {
        let multimodal = self
            .form
            .model
            .as_deref()
            .is_some_and(|m| self.config.is_multimodal(m));
        if !multimodal {
            writeln!(self.out, "The selected model does not accept attachments.")?;
            return Ok(());
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                writeln!(
                    self.out,
                    "Attached {} ({} bytes).",
                    path.display(),
                    bytes.len()
                )?;
                self.form.attachment = Some(Attachment { path, bytes });
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "attachment unreadable");
                writeln!(self.out, "Could not read {}: {e}", path.display())?;
            }
        }
        Ok(())
    }

    // ─── UI events ───────────────────────────────────────────────────────

    /// Apply one event posted by a worker task.
    pub fn apply_event(&mut self, event: UiEvent) -> std::io::Result<()> {
        match event {
            UiEvent::BusyChanged {
                request_id,
                busy: true,
            } => {
                tracing::debug!(%request_id, "busy");
                writeln!(self.out, "Retrieving answer...")?;
            }
            UiEvent::BusyChanged {
                request_id,
                busy: false,
            } => {
                tracing::debug!(%request_id, "idle");
                if self.in_flight == Some(request_id) {
                    self.in_flight = None;
                }
            }
            UiEvent::Completed(completion) => self.complete(completion)?,
            UiEvent::ModelsListed(listing) => self.show_models(listing)?,
        }
        Ok(())
    }

    fn complete(&mut self, completion: Completion) -> std::io::Result<()> {
        let Completion {
            request_id,
            model_id,
            topic,
            question,
            result,
        } = completion;

        let answer = match result {
            RetrievalResult::Answer(answer) => answer,
            RetrievalResult::Failure { kind, message } => {
                let title = match kind {
                    ErrorKind::Validation => "Input error",
                    ErrorKind::Transport => "Failed to send question",
                    ErrorKind::Server => "Server error",
                    ErrorKind::Format => "Unexpected response",
                };
                writeln!(self.out, "{title}: {message}")?;
                return Ok(());
            }
        };

        writeln!(self.out, "\n{answer}\n")?;
        self.form.answer = answer.clone();

        let record = NewQaRecord {
            model: model_id,
            topic,
            question,
            answer: Some(answer),
        };
        match self.db.insert_record(&record) {
            Ok(id) => tracing::info!(%request_id, id, "question and answer saved"),
            Err(e) => {
                tracing::error!(%request_id, error = %e, "failed to save question and answer");
                writeln!(self.out, "Failed to save question and answer: {e}")?;
            }
        }
        Ok(())
    }

    // ─── History ─────────────────────────────────────────────────────────

    fn show(&mut self, id: i64) -> std::io::Result<()> {
        let record = match self.db.get_record(id) {
            Ok(Some(record)) => record,
            Ok(None) => return self.report_history_error(HistoryError::RecordNotFound { id }),
            Err(e) => return self.report_history_error(e),
        };

        writeln!(self.out, "Model:    {}", record.model)?;
        writeln!(self.out, "Topic:    {}", record.topic)?;
        writeln!(self.out, "Question: {}", record.question)?;
        writeln!(
            self.out,
            "Answer:   {}",
            record.answer.as_deref().unwrap_or("")
        )?;

        self.form.model = (record.model != UNSELECTED_MODEL).then_some(record.model);
        self.form.topic = record.topic;
        self.form.question = record.question;
        self.form.answer = record.answer.unwrap_or_default();
        Ok(())
    }

    fn edit(&mut self, id: i64) -> std::io::Result<()> {
        let record = NewQaRecord {
            model: self
                .form
                .model
                .clone()
                .unwrap_or_else(|| UNSELECTED_MODEL.to_string()),
            topic: self.form.topic.clone(),
            question: self.form.question.clone(),
            answer: (!self.form.answer.trim().is_empty()).then(|| self.form.answer.clone()),
        };
        match self.db.update_record(id, &record) {
            Ok(()) => writeln!(self.out, "Record {id} updated."),
            Err(e) => self.report_history_error(e),
        }
    }

    fn export(&mut self, path: Option<PathBuf>) -> std::io::Result<()> {
        let path = path.unwrap_or_else(|| default_export_path(&self.export_dir));
        match export_to_file(&self.db, &path) {
            Ok(count) => writeln!(
                self.out,
                "Exported {count} records to {}.",
                path.display()
            ),
            Err(e) => self.report_history_error(e),
        }
    }

    fn print_records(
        &mut self,
        records: Result<Vec<QaRecord>, HistoryError>,
    ) -> std::io::Result<()> {
        let records = match records {
            Ok(records) => records,
            Err(e) => return self.report_history_error(e),
        };
        if records.is_empty() {
            return writeln!(self.out, "No saved questions.");
        }
        for r in &records {
            writeln!(
                self.out,
                "{:>5}  {}  [{}] {}: {}",
                r.id,
                r.timestamp,
                r.model,
                r.topic,
                truncate_utf8(&r.question, LIST_QUESTION_BYTES)
            )?;
        }
        Ok(())
    }

    fn report_history_error(&mut self, e: HistoryError) -> std::io::Result<()> {
        match &e {
            HistoryError::DatabaseError { .. } | HistoryError::ExportError { .. } => {
                tracing::error!(error = %e, "history operation failed");
            }
            HistoryError::RecordNotFound { .. } | HistoryError::InvalidInput { .. } => {}
        }
        writeln!(self.out, "{e}")
    }
}

/// Export directory used when none is configured: the working directory.
pub fn default_export_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
