//! Slash commands for interactive mode

mod artifact;
mod session;

pub use artifact::ArtifactCommand;
pub use session::SessionCommand;

use lore_client::{ArtifactStore, ConnectionState, Conversation};

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the service)
    Message(String),
    /// Detach from the active session
    NewChat,
    /// Make a known session active
    LoadSession(String),
    /// Delete a session locally and on the service
    DeleteSession(String),
    /// Remove an artifact from the library
    RemoveArtifact(String),
    /// Write an artifact to the download directory
    ExportArtifact(String),
    /// Probe the service
    Health,
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// What the commands can look at
pub struct CommandContext<'a> {
    pub conversation: &'a Conversation,
    pub store: &'a ArtifactStore,
    /// `None` when chatting over REST
    pub connection: Option<ConnectionState>,
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, ctx: &CommandContext<'_>) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "new" | "n" => CommandResult::NewChat,

        "sessions" | "s" => SessionCommand::list(ctx.conversation),

        "load" | "l" => with_id(args, "load <session-id>", CommandResult::LoadSession),

        "delete" | "d" => with_id(args, "delete <session-id>", CommandResult::DeleteSession),

        "status" => SessionCommand::status(ctx),

        "health" => CommandResult::Health,

        "artifacts" | "a" => ArtifactCommand::list(ctx.store),

        "show" => match args {
            "" => usage("show <artifact-id>"),
            id => ArtifactCommand::show(ctx.store, id),
        },

        "remove" => with_id(args, "remove <artifact-id>", CommandResult::RemoveArtifact),

        "export" | "e" => with_id(args, "export <artifact-id>", CommandResult::ExportArtifact),

        _ => CommandResult::Unknown(command),
    })
}

fn with_id(args: &str, syntax: &str, make: fn(String) -> CommandResult) -> CommandResult {
    match args.split_whitespace().next() {
        Some(id) => make(id.to_string()),
        None => usage(syntax),
    }
}

fn usage(syntax: &str) -> CommandResult {
    CommandResult::Message(format!("Usage: /{}", syntax))
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?          Show this help message
  /new, /n               Start a new conversation
  /sessions, /s          List conversation sessions
  /load, /l <id>         Continue a previous session
  /delete, /d <id>       Delete a session (here and on the service)
  /status                Show connection and session info
  /health                Ask the service whether it is ready
  /artifacts, /a         List saved artifacts
  /show <id>             Print a saved artifact
  /remove <id>           Remove an artifact from the library
  /export, /e <id>       Write an artifact to the download directory
  /quit, /exit, /q       Exit lore

Anything else is sent to the service as a question."#
        .to_string()
}
