//! duck - chat with Duck.ai from the terminal

mod commands;
mod config;

use std::io::{self, BufRead, Write};

use clap::Parser;
use duck_ai::{ChatSession, Error, ModelType};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use commands::{CommandResult, InputMode};

/// duck - anonymous AI chat in the terminal
#[derive(Parser, Debug)]
#[command(name = "duck")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (Claude, Llama, GPT4oMini, Mixtral)
    #[arg(short, long)]
    model: Option<String>,

    /// Print replies as they arrive
    #[arg(short, long)]
    stream: bool,

    /// Start in multiline input mode
    #[arg(long)]
    multiline: bool,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Resume a saved conversation by ID
    #[arg(long)]
    resume: Option<String>,

    /// List saved conversations
    #[arg(long)]
    histories: bool,

    /// Do not save the conversation after every exchange
    #[arg(long)]
    no_autosave: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// Interactive loop state
struct Repl {
    input_mode: InputMode,
    stream: bool,
    /// Number of the next prompt
    count: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing. Warnings always reach stderr; --verbose adds debug output.
    let filter = if args.verbose {
        EnvFilter::new("duck_cli=debug,duck_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    tracing::debug!(path = %config::Config::config_path().display(), "Loaded config");

    // CLI args take precedence over the config file
    let model = match args.model.as_deref() {
        Some(name) => name.parse::<ModelType>()?,
        None => cfg.model(),
    };
    let autosave = !args.no_autosave && cfg.autosave.unwrap_or(true);

    let mut session = ChatSession::new(model, cfg.client_config())?
        .with_history(cfg.history_store())
        .with_autosave(autosave);

    if args.histories {
        return list_histories(&session);
    }

    if let Some(ref id) = args.resume {
        session.load(id)?;
        println!(
            "Resuming conversation {} ({} messages)",
            id,
            session.log().len()
        );
    }

    let mut repl = Repl {
        input_mode: if args.multiline {
            InputMode::MultiLine
        } else {
            InputMode::SingleLine
        },
        stream: args.stream || cfg.stream.unwrap_or(false),
        count: session.log().user_turns() + 1,
    };

    let result = match args.command {
        Some(command) => repl.run_turn(&mut session, &command).await.map(|_| ()),
        None => repl.run(&mut session).await,
    };
    session.close();
    result
}

fn list_histories(session: &ChatSession) -> anyhow::Result<()> {
    let ids = session.list_saved()?;
    if ids.is_empty() {
        println!("No histories found.");
        return Ok(());
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

impl Repl {
    async fn run(&mut self, session: &mut ChatSession) -> anyhow::Result<()> {
        println!("Using {}", session.model());
        println!("Type /help to display the help");

        loop {
            println!(">>> User input #{}:", self.count);

            let Some(input) = self.read_input()? else {
                // EOF
                break;
            };

            if input.starts_with('/') {
                if let Some(result) = commands::execute_command(&input, session) {
                    if !self.apply(result, session).await? {
                        break;
                    }
                }
                continue;
            }

            if input.is_empty() {
                println!("Bad input");
                continue;
            }

            if self.run_turn(session, &input).await? {
                self.count += 1;
            }
        }

        Ok(())
    }

    /// Read one prompt. Returns `None` once stdin is exhausted.
    fn read_input(&self) -> io::Result<Option<String>> {
        let stdin = io::stdin();
        match self.input_mode {
            InputMode::SingleLine => {
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    return Ok(None);
                }
                Ok(Some(line.trim().to_string()))
            }
            InputMode::MultiLine => {
                let lines = stdin.lock().lines().collect::<io::Result<Vec<_>>>()?;
                Ok(Some(lines.join("\n").trim().to_string()))
            }
        }
    }

    /// Apply a command result. Returns `false` to exit.
    async fn apply(&mut self, result: CommandResult, session: &mut ChatSession) -> anyhow::Result<bool> {
        println!(">>> Command response:");
        match result {
            CommandResult::SetInputMode(mode) => {
                self.input_mode = mode;
                match mode {
                    InputMode::SingleLine => {
                        println!("Switched to singleline mode, validate is done by <enter>")
                    }
                    InputMode::MultiLine => {
                        println!("Switched to multiline mode, validate is done by EOF <Ctrl+D>")
                    }
                }
            }
            CommandResult::SetStream(on) => {
                self.stream = on;
                println!("Switched to {}stream mode", if on { "" } else { "non " });
            }
            CommandResult::Retry(turn) => {
                println!(">>> REDO Response #{}:", turn);
                if self.run_retry(session, turn).await? {
                    self.count = turn + 1;
                }
            }
            CommandResult::ChangeModel(model) => {
                session.set_model(model);
                println!("Switched to: {} ({})", model.name(), model.wire_name());
            }
            CommandResult::Save => match session.save() {
                Ok(id) => println!("History saved with ID: {}", id),
                Err(e) => println!("Error saving history: {}", e),
            },
            CommandResult::Load(id) => match session.load(&id) {
                Ok(()) => {
                    self.count = session.log().user_turns() + 1;
                    println!("Loaded history with ID: {}", id);
                }
                Err(e) => println!("Error loading history: {}", e),
            },
            CommandResult::Message(msg) => println!("{}", msg),
            CommandResult::Exit => {
                println!("Quit");
                return Ok(false);
            }
            CommandResult::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
        }
        Ok(true)
    }

    /// Send one prompt and print the reply. Returns whether it succeeded.
    async fn run_turn(&self, session: &mut ChatSession, input: &str) -> anyhow::Result<bool> {
        println!(">>> Response #{}:", self.count);
        let outcome = if self.stream {
            match session.ask_stream(input).await {
                Ok(stream) => print_stream(stream).await,
                Err(e) => Err(e),
            }
        } else {
            session.ask(input).await.map(|answer| println!("{}", answer))
        };
        report(outcome)
    }

    async fn run_retry(&self, session: &mut ChatSession, turn: usize) -> anyhow::Result<bool> {
        let outcome = if self.stream {
            match session.reask_stream(turn).await {
                Ok(stream) => print_stream(stream).await,
                Err(e) => Err(e),
            }
        } else {
            session.reask(turn).await.map(|answer| println!("{}", answer))
        };
        report(outcome)
    }
}

async fn print_stream(mut stream: duck_ai::FragmentStream<'_>) -> duck_ai::Result<()> {
    while let Some(fragment) = stream.next().await {
        print!("{}", fragment?);
        io::stdout().flush()?;
    }
    println!();
    Ok(())
}

/// Print a failed turn without ending the session
fn report(outcome: duck_ai::Result<()>) -> anyhow::Result<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(e) => {
            println!();
            println!("Error occurred: {}", e);
            if e.requires_new_conversation() {
                println!("This conversation is full. Save it with /save and start a new one.");
            } else if matches!(e, Error::RateLimited(_)) {
                println!("The backend is throttling requests. Wait a moment, then /retry.");
            }
            Ok(false)
        }
    }
}
