//! Console commands driving the question form and the history store.
//!
//! Every input line is parsed into a [`Command`]. Lines that do not start
//! with `/` are questions.

pub mod console;

use std::path::PathBuf;

use thiserror::Error;

pub use console::{ConsoleApp, Flow};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line.
    Empty,
    /// Set the question and ask it.
    Ask(String),
    /// Refresh the model list.
    Models,
    /// Select a model by id or by its index in the last listing.
    SelectModel(String),
    Topic(String),
    /// Replace the answer field (before `/edit`).
    Answer(String),
    Attach(PathBuf),
    Detach,
    List,
    Search(String),
    /// Load a record into the form.
    Show(i64),
    /// Save the form into an existing record.
    Edit(i64),
    Delete(i64),
    Export(Option<PathBuf>),
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command: /{name} (try /help)")]
    Unknown { name: String },

    #[error("/{command} needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("not a record id: {value}")]
    InvalidId { value: String },
}

pub const HELP_TEXT: &str = "\
Commands:
  <text>            ask <text> with the selected model and topic
  /models           refresh the model list
  /model <id|n>     select a model by id or list number
  /topic <text>     set the topic
  /answer <text>    replace the answer field
  /attach <path>    attach a file (multimodal models only)
  /detach           drop the attachment
  /list             show saved questions, newest first
  /search <topic>   show saved questions whose topic matches
  /show <id>        load a saved question into the form
  /edit <id>        save the form into a saved question
  /delete <id>      delete a saved question
  /export [path]    write every saved question to a text file
  /help             show this help
  /quit             exit";

/// Parse one input line.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Ask(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "models" => Command::Models,
        "model" => Command::SelectModel(required(arg, "model", "a model id or number")?),
        "topic" => Command::Topic(arg.to_string()),
        "answer" => Command::Answer(arg.to_string()),
        "attach" => Command::Attach(PathBuf::from(required(arg, "attach", "a file path")?)),
        "detach" => Command::Detach,
        "list" => Command::List,
        "search" => Command::Search(arg.to_string()),
        "show" => Command::Show(record_id(arg, "show")?),
        "edit" => Command::Edit(record_id(arg, "edit")?),
        "delete" => Command::Delete(record_id(arg, "delete")?),
        "export" => Command::Export((!arg.is_empty()).then(|| PathBuf::from(arg))),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => {
            return Err(CommandError::Unknown {
                name: other.to_string(),
            })
        }
    };
    Ok(command)
}

fn required(
    arg: &str,
    command: &'static str,
    argument: &'static str,
) -> Result<String, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingArgument { command, argument });
    }
    Ok(arg.to_string())
}

fn record_id(arg: &str, command: &'static str) -> Result<i64, CommandError> {
    let arg = required(arg, command, "a record id")?;
    arg.parse()
        .map_err(|_| CommandError::InvalidId { value: arg.clone() })
}
