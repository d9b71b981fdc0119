//! CLI for Livewire
//!
//! Subcommands:
//! - `server`: run the WebSocket server
//! - `client`: connect as a user and print incoming frames (useful for smoke tests)

use std::sync::Arc;

use clap::Parser;
use livewire::app::App;
use livewire::config::load_config;
use livewire::transport::start_websocket_server;
use livewire::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "livewire")]
enum Command {
    /// Start the WebSocket server
    Server,
    /// Connect, authenticate and print everything the server sends
    Client {
        /// WebSocket server URL to connect to
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// User id to authenticate as
        #[arg(long)]
        user: String,
        /// Send one chat message to this recipient after authenticating
        #[arg(long, requires = "msg")]
        to: Option<String>,
        #[arg(long)]
        msg: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    match cmd {
        Command::Server => {
            if let Err(e) = run_server().await {
                error!("Server failed: {}", e);
            }
        }
        Command::Client { url, user, to, msg } => {
            logging::init("info");
            if let Err(e) = run_client(&url, &user, to.zip(msg)).await {
                error!("Client failed: {}", e);
            }
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };
    logging::init(&config.log_level);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = Arc::new(App::build(config)?);
    let sweeper = app.spawn_sweeper();

    tokio::select! {
        result = start_websocket_server(&addr, Arc::clone(&app)) => {
            match result {
                Ok(()) => error!("WebSocket server exited unexpectedly."),
                Err(e) => error!("WebSocket server failed: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    app.shutdown().await;
    sweeper.await?;
    Ok(())
}

async fn run_client(
    url: &str,
    user: &str,
    outgoing: Option<(String, String)>,
) -> Result<(), Box<dyn std::error::Error>> {
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (mut ws_stream, _response) = connect_async(url).await?;

    let auth = json!({ "type": "auth", "userId": user });
    ws_stream.send(WsMessage::text(auth.to_string())).await?;

    if let Some((recipient, msg)) = outgoing {
        let chat = json!({ "type": "chat", "recipientId": recipient, "msg": msg });
        ws_stream.send(WsMessage::text(chat.to_string())).await?;
    }

    loop {
        tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    println!("{text}");
                    let value: serde_json::Value = serde_json::from_str(text.as_str())?;
                    if let Some(message_id) = value.get("messageId").and_then(|id| id.as_str()) {
                        let ack = json!({ "type": "ack", "messageId": message_id });
                        ws_stream.send(WsMessage::text(ack.to_string())).await?;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Server closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                ws_stream.close(None).await?;
                break;
            }
        }
    }

    Ok(())
}
