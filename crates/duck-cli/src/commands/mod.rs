//! Slash commands for interactive mode

mod history;
mod model;
mod retry;

pub use history::HistoryCommand;
pub use model::ModelCommand;
pub use retry::RetryCommand;

use duck_ai::{ChatSession, ModelType};

/// How user input is terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Validate with <enter>
    SingleLine,
    /// Validate with EOF <Ctrl+D>
    MultiLine,
}

/// Result of executing a slash command
#[derive(Debug, PartialEq, Eq)]
pub enum CommandResult {
    /// Switch input mode
    SetInputMode(InputMode),
    /// Turn streaming output on or off
    SetStream(bool),
    /// Re-ask the given user turn
    Retry(usize),
    /// Change the model
    ChangeModel(ModelType),
    /// Save the current conversation
    Save,
    /// Replace the conversation with a saved one
    Load(String),
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, session: &ChatSession) -> Option<CommandResult> {
    let input = input.trim();

    if !input.starts_with('/') {
        return None;
    }

    let parts: Vec<&str> = input[1..].splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "singleline" => CommandResult::SetInputMode(InputMode::SingleLine),

        "multiline" => CommandResult::SetInputMode(InputMode::MultiLine),

        "stream_on" => CommandResult::SetStream(true),

        "stream_off" => CommandResult::SetStream(false),

        "retry" | "r" => RetryCommand::execute(args, session),

        "model" | "m" => ModelCommand::execute(args, session.model()),

        "save" => CommandResult::Save,

        "load" => HistoryCommand::load(args),

        "list_histories" | "ls" => HistoryCommand::list(session),

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help              Display this help message
  /singleline        Singleline mode, validate with <enter>
  /multiline         Multiline mode, validate with EOF <Ctrl+D>
  /stream_on         Print replies as they arrive
  /stream_off        Print replies once complete
  /retry [N]         Regenerate the answer to prompt N (default: last)
  /model [name]      List models or switch to one
  /save              Save the current conversation
  /load ID           Load a saved conversation
  /list_histories    List saved conversations
  /quit              Quit"#
        .to_string()
}
