//! lore - command-line client for the lore RAG service

mod commands;
mod config;
mod repl;
mod ui;

use clap::Parser;
use lore_client::{
    ChannelConfirmer, ClientConfig, ClientContext, DuplicateConfirmer, GateDecision,
    StaticConfirmer,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use commands::{ArtifactCommand, CommandResult};
use repl::{Backend, Client};

/// lore - chat with the lore RAG service and keep the scenarios it writes
#[derive(Parser, Debug)]
#[command(name = "lore")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST base URL (default: http://localhost:8000)
    #[arg(long)]
    http: Option<String>,

    /// Streaming channel URL (default: ws://127.0.0.1:8002/ws)
    #[arg(long)]
    ws: Option<String>,

    /// Chat over POST /chat instead of the streaming channel
    #[arg(long)]
    rest: bool,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Non-interactive answer when an artifact resembles indexed documents (save, force, cancel)
    #[arg(long, default_value = "cancel")]
    on_similar: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Check whether the service is ready
    #[arg(long)]
    health: bool,

    /// List saved artifacts
    #[arg(long)]
    artifacts: bool,

    /// Print a saved artifact
    #[arg(long, value_name = "ID")]
    show: Option<String>,

    /// Remove a saved artifact
    #[arg(long, value_name = "ID")]
    remove_artifact: Option<String>,

    /// Write a saved artifact to the download directory
    #[arg(long, value_name = "ID")]
    export: Option<String>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

impl Args {
    fn wants_library(&self) -> bool {
        self.artifacts || self.show.is_some() || self.remove_artifact.is_some() || self.export.is_some()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    let filter = if args.verbose {
        EnvFilter::new("lore=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
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

    // Merge config with CLI args (CLI takes precedence)
    let cfg = config::Config::load();
    let mut client_config = cfg.client_config();
    if let Some(url) = args.http.clone() {
        client_config.http_url = url;
    }
    if let Some(url) = args.ws.clone() {
        client_config.ws_url = url;
    }
    let use_rest = args.rest || cfg.rest.unwrap_or(false);

    if args.wants_library() {
        return run_library(client_config, &args);
    }

    if args.health {
        let context = ClientContext::create(client_config, reject())?;
        let health = context.health().await?;
        println!("{}", repl::health_line(&health));
        if !health.is_ready() {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Non-interactive mode
    if let Some(ref command) = args.command {
        let decision = ui::parse_decision(&args.on_similar)
            .ok_or_else(|| anyhow::anyhow!("--on-similar expects save, force or cancel"))?;
        let mut client = build_client(client_config, use_rest, Arc::new(StaticConfirmer(decision)))?;
        let succeeded = repl::run_command(&mut client, command).await;
        client.dispose().await;
        if !succeeded? {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Interactive mode
    let (confirmer, decisions) = ChannelConfirmer::new();
    let mut client = build_client(client_config, use_rest, Arc::new(confirmer))?;
    let result = repl::run_interactive(&mut client, decisions).await;
    client.dispose().await;
    result
}

fn reject() -> Arc<dyn DuplicateConfirmer> {
    Arc::new(StaticConfirmer(GateDecision::Reject))
}

fn build_client(
    config: ClientConfig,
    rest: bool,
    confirmer: Arc<dyn DuplicateConfirmer>,
) -> anyhow::Result<Client> {
    let context = ClientContext::create(config, confirmer.clone())?;
    let backend = if rest {
        Backend::Rest(context.rest_coordinator(confirmer))
    } else {
        Backend::Stream
    };
    Ok(Client::new(context, backend))
}

/// Artifact library operations; nothing connects
fn run_library(config: ClientConfig, args: &Args) -> anyhow::Result<()> {
    let context = ClientContext::create(config, reject())?;

    if let Some(ref id) = args.remove_artifact {
        match context.remove_artifact(id)? {
            Some(artifact) => println!("Removed \"{}\".", artifact.title),
            None => anyhow::bail!("no artifact with id {}", id),
        }
    }
    if let Some(ref id) = args.export {
        let path = context.export_artifact(id)?;
        println!("{}", path.display());
    }
    if let Some(ref id) = args.show {
        if let CommandResult::Message(text) = ArtifactCommand::show(context.store(), id) {
            println!("{}", text);
        }
    }
    if args.artifacts {
        if let CommandResult::Message(text) = ArtifactCommand::list(context.store()) {
            println!("{}", text);
        }
    }
    Ok(())
}
