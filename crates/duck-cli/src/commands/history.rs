//! /load and /list_histories commands

use super::CommandResult;
use duck_ai::ChatSession;

pub struct HistoryCommand;

impl HistoryCommand {
    pub fn load(args: &str) -> CommandResult {
        match args.split_whitespace().next() {
            Some(id) => CommandResult::Load(id.to_string()),
            None => CommandResult::Message("You must provide an ID to load.".to_string()),
        }
    }

    pub fn list(session: &ChatSession) -> CommandResult {
        match session.list_saved() {
            Ok(ids) if ids.is_empty() => CommandResult::Message("No histories found.".to_string()),
            Ok(ids) => {
                let mut output = format!("Saved histories in {}:\n", session.history().dir().display());
                for id in ids {
                    let marker = if session.saved_id() == Some(id.as_str()) { " *" } else { "" };
                    output.push_str(&format!("  {}{}\n", id, marker));
                }
                CommandResult::Message(output.trim_end().to_string())
            }
            Err(e) => CommandResult::Message(format!("Error listing histories: {}", e)),
        }
    }
}
