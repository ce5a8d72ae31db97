//! CLI for PopChat
//!
//! Subcommands:
//! - `server`: run the chat server
//! - `client`: log in and chat from stdin

use chrono::Local;
use clap::Parser;
use popchat::auth::Credentials;
use popchat::client::{ChatEvent, ChatSession, Delivery};
use popchat::config::{ClientSettings, Settings, load_config};
use popchat::transport::start_websocket_server;
use popchat::utils::ServerError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "popchat", version, about = "Multi-user chat over WebSockets")]
enum Command {
    /// Start the chat server
    Server,
    /// Log in and send every stdin line to the chat
    Client {
        #[arg(long)]
        login: String,
        #[arg(long)]
        password: String,
        /// Overrides `client.host` from the configuration
        #[arg(long)]
        host: Option<String>,
        /// Overrides `client.port` from the configuration
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    popchat::utils::logging::init("info");

    let cmd = Command::parse();
    let settings = match load_config().map_err(ServerError::from) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let result = match cmd {
        Command::Server => run_server(settings).await,
        Command::Client {
            login,
            password,
            host,
            port,
        } => {
            let mut client = settings.client;
            if let Some(host) = host {
                client.host = host;
            }
            if let Some(port) = port {
                client.port = port;
            }
            run_client(client, Credentials::new(login, password)).await
        }
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn(start_websocket_server(settings, shutdown.clone()));

    tokio::select! {
        result = &mut server => {
            result??;
            error!("Chat server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            shutdown.cancel();
            server.await??;
        }
    }

    Ok(())
}

async fn run_client(
    settings: ClientSettings,
    credentials: Credentials,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = ChatSession::connect_to(&settings, credentials);
    session.connect().await?;
    info!("Connected to {}", settings.url());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if session.send(&line) == Delivery::Queued {
                        println!("(offline, {} message(s) queued)", session.pending());
                    }
                }
                None => break,
            },
            event = session.next_event() => match event {
                Some(ChatEvent::Error(status)) if !session.link_state().should_be_online => {
                    session.shutdown();
                    return Err(status.into());
                }
                Some(event) => print_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown();
    Ok(())
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Message(message) => {
            let time = message
                .timestamp
                .to_datetime()
                .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
                .unwrap_or_default();
            println!("[{time}] {}: {}", message.from, message.text);
        }
        ChatEvent::StateChanged { previous, current } => {
            info!(%previous, %current, "Connection state changed");
        }
        ChatEvent::Error(status) => error!(%status, "Chat error"),
        ChatEvent::StreamClosed => warn!("Chat stream closed, reconnecting"),
    }
}
