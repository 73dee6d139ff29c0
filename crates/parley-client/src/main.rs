mod commands;
mod config;
mod render;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use parley_api::{ApiClient, ApiConfig};
use parley_gateway::{EventBus, WsConfig, WsTransport};
use parley_sync::{ConversationSession, SyncEngine};
use parley_types::api::Credential;
use parley_types::UserId;

use commands::Input;
use config::Config;
use render::Transcript;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Follow and take part in one conversation from the terminal")]
struct Args {
    #[command(subcommand)]
    target: Target,
}

#[derive(Subcommand, Debug)]
enum Target {
    /// A channel inside a workspace
    Channel { workspace: String, channel: String },
    /// The direct conversation with another user
    Dm { peer: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the transcript.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info,parley_sync=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let me = UserId::from(config.user_id.clone());
    let credential = Credential::bearer(config.token.clone());

    // -- Wiring --

    let transport = Arc::new(WsTransport::new(WsConfig::new(config.gateway_url.clone())));
    let bus = EventBus::new(transport, config.backoff.clone());
    let api = ApiClient::new(ApiConfig::new(config.api_url.clone()), credential.clone(), me)?;
    let engine = SyncEngine::new(bus, Arc::new(api));

    // History still loads over REST while the gateway is down.
    if let Err(e) = engine.connect(credential).await {
        warn!("Realtime updates unavailable: {}", e);
    }

    let session = match args.target {
        Target::Channel { workspace, channel } => engine.open_channel(workspace, channel)?,
        Target::Dm { peer } => engine.open_direct(peer)?,
    };
    info!("Following {} as {}", session.key(), engine.me());

    let printer = tokio::spawn(print_changes(session.watch()));
    let states = tokio::spawn(report_connection(engine.bus().state_changes()));

    prompt(&session).await?;

    printer.abort();
    states.abort();
    session.close();
    engine.logout();
    Ok(())
}

async fn print_changes(mut view: tokio::sync::watch::Receiver<parley_sync::ConversationView>) {
    let mut transcript = Transcript::default();
    loop {
        let lines = {
            let current = view.borrow_and_update();
            if current.loaded || !current.messages.is_empty() {
                transcript.update(&current.messages)
            } else {
                Vec::new()
            }
        };
        for line in lines {
            println!("{}", line);
        }
        if view.changed().await.is_err() {
            break;
        }
    }
}

async fn report_connection(
    mut state: tokio::sync::watch::Receiver<parley_gateway::ConnectionState>,
) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        info!("Gateway {:?}", current);
    }
}

async fn prompt(session: &ConversationSession) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = match commands::parse(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(usage) => {
                eprintln!("{}", usage);
                continue;
            }
        };
        if input == Input::Quit {
            break;
        }

        match commands::execute(session, input).await {
            Ok(Some(note)) => eprintln!("{}", note),
            Ok(None) => {}
            Err(e) => eprintln!("error: {}", e),
        }
    }
    Ok(())
}
