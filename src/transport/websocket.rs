use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::app::App;
use crate::session::{ClientSession, Session};
use crate::subscription::Readiness;
use crate::transport::message::{ClientMessage, ServerMessage};

/// Bind `addr` and serve connections until accepting fails.
pub async fn start_websocket_server(addr: &str, app: Arc<App>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, app).await;
    Ok(())
}

pub async fn serve(listener: TcpListener, app: Arc<App>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let app = Arc::clone(&app);
                spawn(handle_connection(stream, peer, app));
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, app: Arc<App>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    // Everything bound for the client, control frames and deliveries alike,
    // goes through this queue.
    spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = msg.is_close();
            if let Err(e) = ws_sender.send(msg).await {
                debug!(%peer, error = %e, "failed to write to client");
                break;
            }
            if closing {
                break;
            }
        }
        debug!(%peer, "send loop closed");
    });

    let mut connection = Connection {
        app,
        peer,
        tx,
        user: None,
    };

    while let Some(frame) = ws_receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%peer, error = %e, "read failed");
                break;
            }
        };
        let flow = match msg {
            WsMessage::Text(text) => connection.handle_text(text.as_str()).await,
            WsMessage::Close(_) => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        };
        if flow.is_break() {
            break;
        }
    }

    connection.disconnect().await;
}

/// The authenticated identity of a connection.
struct Identity {
    user_id: String,
    session_id: String,
}

struct Connection {
    app: Arc<App>,
    peer: SocketAddr,
    tx: UnboundedSender<WsMessage>,
    user: Option<Identity>,
}

impl Connection {
    async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        let parsed = serde_json::from_str::<ClientMessage>(text);

        let Some(user_id) = self.user.as_ref().map(|identity| identity.user_id.clone()) else {
            return match parsed {
                Ok(ClientMessage::Auth { user_id, .. }) => self.authenticate(user_id).await,
                _ => {
                    warn!(peer = %self.peer, "frame before authentication");
                    self.reply(&ServerMessage::error("must authenticate first"));
                    self.close();
                    ControlFlow::Break(())
                }
            };
        };

        match parsed {
            Ok(ClientMessage::Auth { .. }) => {
                self.reply(&ServerMessage::error("already authenticated"));
            }
            Ok(ClientMessage::Presence { status }) => {
                debug!(user = %user_id, ?status, "presence");
            }
            Ok(ClientMessage::Chat { recipient_id, msg }) => {
                if let Err(e) = self.app.producer().send(&user_id, &recipient_id, &msg) {
                    error!(user = %user_id, recipient = %recipient_id, error = %e, "failed to send chat message");
                    self.reply(&ServerMessage::error("failed to send message"));
                }
            }
            Ok(ClientMessage::Ack { message_id }) => {
                if let Err(e) = self.app.producer().acknowledge(&user_id, &message_id) {
                    warn!(user = %user_id, message_id = %message_id, error = %e, "failed to record acknowledgement");
                }
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "invalid client frame");
                self.reply(&ServerMessage::error(format!("invalid message: {e}")));
            }
        }
        ControlFlow::Continue(())
    }

    async fn authenticate(&mut self, user_id: String) -> ControlFlow<()> {
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            self.reply(&ServerMessage::auth_failed("userId is required"));
            return ControlFlow::Continue(());
        }

        let session = Arc::new(ClientSession::new(self.tx.clone()));
        let session_id = session.id().to_string();
        let hub = self.app.hub();

        match hub.register_session(&user_id, session).await {
            Err(e) => {
                warn!(user = %user_id, error = %e, "session registration failed");
                hub.remove_session_if(&user_id, &session_id).await;
                self.reply(&ServerMessage::auth_failed("subscription unavailable"));
                return ControlFlow::Continue(());
            }
            Ok(Readiness::Abandoned) => {
                hub.remove_session_if(&user_id, &session_id).await;
                self.reply(&ServerMessage::auth_failed("subscription unavailable"));
                return ControlFlow::Continue(());
            }
            Ok(Readiness::TimedOut) => {
                // The subscription stays in place and may still confirm.
                warn!(user = %user_id, "subscription not confirmed in time");
            }
            Ok(Readiness::Confirmed) => {}
        }

        info!(peer = %self.peer, user = %user_id, session = %session_id, "client authenticated");
        self.reply(&ServerMessage::auth_success(&user_id));

        match self.app.reconciler().fetch_and_republish_undelivered(&user_id) {
            Ok(report) if !report.is_empty() => {
                info!(
                    user = %user_id,
                    republished = report.republished().len(),
                    skipped = report.skipped().len(),
                    failed = report.failed().len(),
                    "reconciled undelivered messages"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(user = %user_id, error = %e, "reconciliation failed"),
        }

        self.user = Some(Identity {
            user_id,
            session_id,
        });
        ControlFlow::Continue(())
    }

    fn reply(&self, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(text) => {
                if self.tx.send(WsMessage::text(text)).is_err() {
                    debug!(peer = %self.peer, "client queue closed");
                }
            }
            Err(e) => error!(error = %e, "failed to encode server frame"),
        }
    }

    fn close(&self) {
        let _ = self.tx.send(WsMessage::Close(None));
    }

    async fn disconnect(self) {
        if let Some(identity) = &self.user {
            self.app
                .hub()
                .remove_session_if(&identity.user_id, &identity.session_id)
                .await;
        }
        info!(peer = %self.peer, "client disconnected");
    }
}
