//! Application configuration loading and validation.
//!
//! Reads `config.yaml` and resolves environment variables. The service
//! address is resolved once at startup and handed to the inference
//! components as an explicit `base_url`; nothing reads configuration lazily.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::RetrievalError;

/// File name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Environment variable that points directly at a config file.
pub const CONFIG_ENV_VAR: &str = "OLLAMA_DESK_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Location of the inference service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Raw file shape, before required keys are checked.
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    server: Option<ServerConfig>,
    #[serde(default)]
    multimodal_models: Vec<String>,
    #[serde(default)]
    database_path: Option<String>,
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host name or IP of the inference service.
    pub address: String,
    /// TCP port of the inference service.
    pub port: u16,
    /// Model id fragments that accept image attachments (e.g. `"llava"`).
    pub multimodal_models: Vec<String>,
    /// Override for the Q&A database location.
    pub database_path: Option<PathBuf>,
}

impl AppConfig {
    /// Build a config pointing at `address:port` with no optional settings.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            multimodal_models: Vec::new(),
            database_path: None,
        }
    }

    /// Base URL of the inference service, e.g. `http://localhost:11434`.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Whether `model_id` is flagged as accepting attachments.
    pub fn is_multimodal(&self, model_id: &str) -> bool {
        let id = model_id.to_ascii_lowercase();
        self.multimodal_models
            .iter()
            .any(|m| !m.is_empty() && id.contains(&m.to_ascii_lowercase()))
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the configuration file.
///
/// Checks `OLLAMA_DESK_CONFIG` first, then searches upward from `start` for
/// `config.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, RetrievalError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(RetrievalError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<AppConfig, RetrievalError> {
    let raw = std::fs::read_to_string(path).map_err(|e| RetrievalError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Parse configuration text. Performs `${VAR}` / `${VAR:-default}`
/// interpolation before YAML parsing.
pub fn parse_config(raw: &str) -> Result<AppConfig, RetrievalError> {
    let interpolated = interpolate_env_vars(raw);

    let config: RawConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| RetrievalError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    let server = config.server.ok_or_else(|| missing("server"))?;
    let address = server
        .address
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| missing("server.address"))?;
    let port = server.port.ok_or_else(|| missing("server.port"))?;

    Ok(AppConfig {
        address: address.trim().to_string(),
        port,
        multimodal_models: config.multimodal_models,
        database_path: config
            .database_path
            .filter(|p| !p.trim().is_empty())
            .map(|p| PathBuf::from(expand_tilde(p.trim()))),
    })
}

fn missing(key: &str) -> RetrievalError {
    RetrievalError::ConfigError {
        reason: format!("missing configuration for '{key}'"),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => std::env::var(var_name).unwrap_or_else(|_| default.to_string()),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
