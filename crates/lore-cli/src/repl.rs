//! Chat loops over either transport

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use lore_client::{
    ClientContext, ClientEvent, ConnectionState, Conversation, ExchangeOutcome, GateDecision,
    PendingDecision, Removal, RestCoordinator,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::commands::{self, CommandContext, CommandResult};
use crate::ui::{self, StreamPrinter};

/// How long a printed response may lag behind its outcome
const PRINT_GRACE: Duration = Duration::from_secs(2);

/// Which coordinator runs the exchanges
pub enum Backend {
    Stream,
    Rest(RestCoordinator),
}

/// A client context plus the chosen transport
pub struct Client {
    context: ClientContext,
    backend: Backend,
}

impl Client {
    /// Wrap a context; the streaming flavour starts connecting immediately
    pub fn new(mut context: ClientContext, backend: Backend) -> Self {
        if matches!(backend, Backend::Stream) {
            context.open();
        }
        Self { context, backend }
    }

    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    pub fn conversation(&self) -> &Conversation {
        match self.backend {
            Backend::Stream => self.context.coordinator().conversation(),
            Backend::Rest(ref rest) => rest.conversation(),
        }
    }

    /// `None` when chatting over REST
    pub fn connection(&self) -> Option<ConnectionState> {
        match self.backend {
            Backend::Stream => Some(self.context.coordinator().state()),
            Backend::Rest(_) => None,
        }
    }

    /// Wait (bounded) for the streaming channel to come up
    pub async fn ready(&self, within: Duration) -> bool {
        if let Backend::Rest(_) = self.backend {
            return true;
        }
        let mut states = self.context.coordinator().subscribe_state();
        matches!(
            tokio::time::timeout(within, states.wait_for(|s| s.state == ConnectionState::Connected))
                .await,
            Ok(Ok(_))
        )
    }

    /// Run one exchange to its end
    pub async fn ask(&mut self, text: &str) -> lore_client::Result<ExchangeOutcome> {
        match self.backend {
            Backend::Stream => {
                let coordinator = self.context.coordinator_mut();
                coordinator.submit(text)?;
                coordinator
                    .next_outcome()
                    .await
                    .ok_or(lore_client::Error::TransportLoss)
            }
            Backend::Rest(ref mut rest) => rest.send(text).await,
        }
    }

    pub fn new_chat(&mut self) {
        match self.backend {
            Backend::Stream => self.context.coordinator_mut().new_chat(),
            Backend::Rest(ref mut rest) => rest.new_chat(),
        }
    }

    pub fn load_session(&mut self, id: &str) -> bool {
        match self.backend {
            Backend::Stream => self.context.coordinator_mut().load_session(id),
            Backend::Rest(ref mut rest) => rest.load_session(id),
        }
    }

    pub async fn delete_session(&mut self, id: &str) -> Removal {
        match self.backend {
            Backend::Stream => self.context.delete_session(id).await,
            Backend::Rest(ref mut rest) => {
                let removal = rest.delete_session(id);
                if let Err(e) = self.context.rest().delete_session(id).await {
                    tracing::warn!(session_id = id, "Remote session delete failed: {}", e);
                }
                removal
            }
        }
    }

    pub async fn dispose(self) {
        self.context.dispose().await;
    }
}

/// Print events as they arrive; `printed` fires after each exchange's last line
fn spawn_printer(mut events: broadcast::Receiver<ClientEvent>, printed: Arc<Notify>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printer = StreamPrinter::default();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Printer skipped {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let terminal = event.is_terminal();
            match event {
                ClientEvent::Partial { ref text, .. } => {
                    print!("{}", printer.update(text));
                    io::stdout().flush().ok();
                }
                ClientEvent::ExchangeCompleted { ref text, .. } => {
                    println!("{}", printer.finish(text));
                }
                ClientEvent::ExchangeFailed { ref message, .. } => {
                    if printer.reset() {
                        println!();
                    }
                    eprintln!("Error: {}", message);
                }
                ClientEvent::ConnectionChanged { state } => {
                    let line = ui::notice(&event).unwrap_or_default();
                    match state {
                        ConnectionState::Disconnected | ConnectionState::Error => eprintln!("{}", line),
                        _ => tracing::debug!("{}", line),
                    }
                }
                ClientEvent::Status { .. } => {
                    // Once text streams, status lines would split it
                    if !printer.is_streaming() {
                        if let Some(line) = ui::notice(&event) {
                            eprintln!("{}", line);
                        }
                    }
                }
                _ => {
                    if let Some(line) = ui::notice(&event) {
                        println!("{}", line);
                    }
                }
            }
            if terminal {
                printed.notify_one();
            }
        }
    })
}

/// Ask once, wait for the artifact pipeline, then return whether the exchange succeeded
pub async fn run_command(client: &mut Client, command: &str) -> anyhow::Result<bool> {
    println!("lore> {}", command);
    println!();

    let printed = Arc::new(Notify::new());
    let handle = spawn_printer(client.context().subscribe(), printed.clone());

    if !client.ready(client.context().config().connection.liveness_grace).await {
        handle.abort();
        anyhow::bail!(
            "could not connect to {}",
            client.context().config().ws_url
        );
    }

    let outcome = client.ask(command).await?;
    let _ = tokio::time::timeout(PRINT_GRACE, printed.notified()).await;

    let succeeded = match outcome {
        ExchangeOutcome::Completed { persistence, .. } => {
            if let Some(persistence) = persistence {
                if let Err(e) = persistence.await {
                    eprintln!("Artifact pipeline aborted: {}", e);
                }
                // Let the printer catch up with the pipeline's events
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            true
        }
        // Already reported by the printer
        ExchangeOutcome::Failed { .. } => false,
    };

    handle.abort();
    Ok(succeeded)
}

/// Line-mode chat with slash commands
pub async fn run_interactive(
    client: &mut Client,
    mut decisions: mpsc::UnboundedReceiver<PendingDecision>,
) -> anyhow::Result<()> {
    let printed = Arc::new(Notify::new());
    let handle = spawn_printer(client.context().subscribe(), printed.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        match client.connection() {
            Some(_) => eprintln!("lore ({})", client.context().config().ws_url),
            None => eprintln!("lore ({}, rest)", client.context().config().http_url),
        }
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // EOF
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                if input.starts_with('/') {
                    let result = {
                        let ctx = CommandContext {
                            conversation: client.conversation(),
                            store: client.context().store(),
                            connection: client.connection(),
                        };
                        commands::execute_command(input, &ctx)
                    };
                    if let Some(result) = result {
                        if !apply_command(client, result).await {
                            break;
                        }
                        println!();
                        continue;
                    }
                }

                println!();
                match client.ask(input).await {
                    Ok(_) => {
                        let _ = tokio::time::timeout(PRINT_GRACE, printed.notified()).await;
                    }
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Some(pending) = decisions.recv() => {
                let decision = ask_decision(&pending, &mut lines).await?;
                pending.resolve(decision);
            }
        }
    }

    handle.abort();
    Ok(())
}

async fn ask_decision<R>(
    pending: &PendingDecision,
    lines: &mut tokio::io::Lines<R>,
) -> io::Result<GateDecision>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    println!();
    println!("{}", ui::decision_prompt(pending));
    loop {
        print!("? ");
        io::stdout().flush()?;
        let Some(answer) = lines.next_line().await? else {
            return Ok(GateDecision::Reject);
        };
        match ui::parse_decision(&answer) {
            Some(decision) => return Ok(decision),
            None => println!("Please answer s, f or c."),
        }
    }
}

/// Returns false when the user asked to exit
async fn apply_command(client: &mut Client, result: CommandResult) -> bool {
    match result {
        CommandResult::Message(msg) => println!("{}", msg),
        CommandResult::Exit => return false,
        CommandResult::NewChat => {
            client.new_chat();
            println!("Started a new conversation.");
        }
        CommandResult::LoadSession(id) => {
            if client.load_session(&id) {
                println!("Continuing session {}.", id);
            } else {
                println!("No session with id {}. Try /sessions.", id);
            }
        }
        CommandResult::DeleteSession(id) => match client.delete_session(&id).await {
            Removal::Missing => println!("No session with id {}.", id),
            Removal::Removed => println!("Deleted session {}.", id),
            Removal::RemovedActive => {
                println!("Deleted session {}; started a new conversation.", id)
            }
        },
        CommandResult::RemoveArtifact(id) => match client.context().remove_artifact(&id) {
            Ok(Some(artifact)) => println!("Removed \"{}\".", artifact.title),
            Ok(None) => println!("No artifact with id {}.", id),
            Err(e) => println!("Could not remove artifact: {}", e),
        },
        CommandResult::ExportArtifact(id) => match client.context().export_artifact(&id) {
            Ok(path) => println!("Written to {}", path.display()),
            Err(e) => println!("Export failed: {}", e),
        },
        CommandResult::Health => match client.context().health().await {
            Ok(health) => println!("{}", health_line(&health)),
            Err(e) => println!("Service unreachable: {}", e),
        },
        CommandResult::Unknown(cmd) => {
            println!("Unknown command: /{}", cmd);
            println!("Type /help for available commands.");
        }
    }
    true
}

pub fn health_line(health: &lore_proto::HealthStatus) -> String {
    let readiness = if health.is_ready() { "ready" } else { "not ready" };
    let line = match health.agent_status {
        Some(ref agent) => format!(
            "{} ({}, agent {}) {}",
            health.status, readiness, agent, health.message
        ),
        None => format!("{} ({}) {}", health.status, readiness, health.message),
    };
    line.trim_end().to_string()
}
