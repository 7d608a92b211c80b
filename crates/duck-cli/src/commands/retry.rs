//! /retry command - regenerate the answer to an earlier prompt

use super::CommandResult;
use duck_ai::ChatSession;

pub struct RetryCommand;

impl RetryCommand {
    /// Execute /retry command
    /// - No args: retry the most recent prompt
    /// - With N: retry prompt N; negative values are negated, and values past
    ///   the last answered prompt are clamped to it
    pub fn execute(args: &str, session: &ChatSession) -> CommandResult {
        if session.log().is_empty() {
            return CommandResult::Message("Nothing to retry yet.".to_string());
        }
        CommandResult::Retry(resolve_turn(args, session.tokens().len()))
    }
}

fn resolve_turn(args: &str, token_count: usize) -> usize {
    let last = token_count.saturating_sub(1);
    match args.parse::<i64>() {
        Ok(n) => usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX).min(last),
        Err(_) => last,
    }
}
