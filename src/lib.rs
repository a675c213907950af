pub mod commands;
pub mod history;
pub mod inference;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use commands::console::{default_export_dir, ConsoleApp};
use history::database::DEFAULT_DB_FILE;
use history::QaDatabase;
use inference::config::{find_config_path, load_config};
use inference::{ui_channel, AppConfig, ChatTransport, HttpTransport};

/// Directory holding `ollama_desk.log` and, unless `database_path` is set
/// in `config.yaml`, the `ollama_QA.db` history.
///
/// Resolves to `<platform data dir>/com.ollama-desk.app` (for example
/// `~/.local/share/com.ollama-desk.app` on Linux) and falls back to
/// `~/.ollama-desk` when the platform directory is unknown.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.ollama-desk.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ollama-desk")
}

/// Send pipeline and history logs to `ollama_desk.log` instead of stdout,
/// which belongs to the console prompt.
///
/// Each console session starts a fresh file after rotating the previous
/// three. `RUST_LOG` overrides the default `ollama_desk=info,warn` filter.
fn init_tracing() -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("ollama_desk.log");
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ollama_desk=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Ollama Desk starting ==="
    );
    Ok(())
}

/// Keep the logs of the last `keep` console sessions: `ollama_desk.log`
/// becomes `ollama_desk.log.1`, `.1` becomes `.2`, and `.{keep}` is dropped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let numbered = |n: u32| PathBuf::from(format!("{}.{n}", base_path.display()));

    let _ = std::fs::remove_file(numbered(keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(numbered(n), numbered(n + 1));
    }
    if base_path.exists() {
        let _ = std::fs::rename(base_path, numbered(1));
    }
}

/// Sink for `ollama_desk.log`. Every write is flushed, so the lines logged
/// just before the console is killed (Ctrl-C mid-answer) are not lost.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }

    fn with_file<T>(
        &self,
        op: impl FnOnce(&mut std::fs::File) -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("log file lock poisoned: {e}")))?;
        op(&mut file)
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.with_file(|f| {
            let n = f.write(buf)?;
            f.flush()?;
            Ok(n)
        })
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.with_file(|f| f.flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Resolve the Q&A database path: `database_path` from the config, else
/// `ollama_QA.db` in the data directory. Creates the parent directory.
fn resolve_db_path(config: &AppConfig, data_dir: &Path) -> std::io::Result<PathBuf> {
    let path = config
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir.join(DEFAULT_DB_FILE));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(path)
}

/// Run the console application until `/quit` or end of input.
pub async fn run() -> anyhow::Result<()> {
    // Tracing first, before any tracing::info!() calls.
    init_tracing().context("failed to initialize logging")?;

    let cwd = std::env::current_dir()?;
    let config_path = find_config_path(&cwd)?;
    let config = load_config(&config_path)?;
    tracing::info!(
        path = %config_path.display(),
        base_url = %config.base_url(),
        "configuration loaded"
    );

    let db_path = resolve_db_path(&config, &data_dir())?;
    let db = QaDatabase::open(&db_path.to_string_lossy())
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    tracing::info!(db_path = %db_path.display(), "Q&A database initialized");

    let transport: Arc<dyn ChatTransport> = Arc::new(HttpTransport::new(config.base_url())?);
    let (queue, events) = ui_channel();

    let app = ConsoleApp::new(config, db, transport, queue, std::io::stdout())
        .with_export_dir(default_export_dir());
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    app.run(input, events).await
}
