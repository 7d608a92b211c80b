//! /model command - list and switch models

use super::CommandResult;
use duck_ai::ModelType;

pub struct ModelCommand;

impl ModelCommand {
    /// Execute /model command - lists models if no args, or switches to the named one
    pub fn execute(args: &str, current: ModelType) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(list_models(current));
        }

        match args.parse::<ModelType>() {
            Ok(model) => CommandResult::ChangeModel(model),
            Err(_) => CommandResult::Message(format!(
                "No model found matching '{}'\nUse /model to list available models",
                args
            )),
        }
    }
}

fn list_models(current: ModelType) -> String {
    let mut output = String::from("Available models:\n");
    for model in ModelType::ALL {
        let marker = if model == current { " *" } else { "" };
        output.push_str(&format!("  {:<10} {}{}\n", model.name(), model.wire_name(), marker));
    }
    output.push_str("\nSwitch with: /model <name>");
    output
}
