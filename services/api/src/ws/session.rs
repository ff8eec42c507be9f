//! Manages the WebSocket connection lifecycle for a conversation session.

use super::{
    cycle,
    protocol::{ClientMessage, ServerMessage},
    registry::Outbound,
    voice::VoiceControl,
};
use crate::state::AppState;
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use mentor_core::quota::Tier;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the `init` handshake, registers the session, then runs the main
/// message loop. Outbound traffic flows through a writer task fed by the
/// registry's channel so that fan-out from other tasks never touches the
/// socket directly.
#[instrument(name = "ws_session", skip_all, fields(conn_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id: u32 = rand::random();
    tracing::Span::current().record("conn_id", &conn_id.to_string());
    info!("New WebSocket connection. Awaiting init...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    let (user_id, tier) = match await_init(&mut socket_rx).await {
        Ok(identity) => identity,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_direct(
                &mut socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    let (session_id, outbound_rx) = state.registry.register(&user_id).await;
    let writer = tokio::spawn(run_writer(socket_tx, outbound_rx));

    // Confirm registration with a context snapshot the client can render.
    let context = state.context.context(&user_id).await;
    if state
        .registry
        .send(
            session_id,
            ServerMessage::Initialized {
                session_id,
                context,
            },
        )
        .await
        .is_err()
    {
        error!("Failed to queue Initialized message; dropping connection.");
        return;
    }

    let session_span = tracing::info_span!("session_runtime", %session_id, %user_id);
    async {
        if let Err(e) = run_session(&state, session_id, &user_id, tier, socket_rx).await {
            error!(error = ?e, "Session terminated with error.");
        }
        info!("Session finished.");
    }
    .instrument(session_span)
    .await;

    drop(writer);
}

/// The first message from the client must be an `init` message.
async fn await_init(socket_rx: &mut SplitStream<WebSocket>) -> Result<(String, Tier)> {
    match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => {
            let msg: ClientMessage = serde_json::from_str(&text)?;
            if let ClientMessage::Init { user_id, tier } = msg {
                if user_id.trim().is_empty() {
                    return Err(anyhow!("`user_id` must not be empty"));
                }
                Ok((user_id, tier))
            } else {
                Err(anyhow!("First message must be `init`"))
            }
        }
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => Err(anyhow!("Client disconnected before sending init message.")),
    }
}

/// The main event loop for an active WebSocket session.
async fn run_session(
    state: &Arc<AppState>,
    session_id: Uuid,
    user_id: &str,
    tier: Tier,
    mut socket_rx: SplitStream<WebSocket>,
) -> Result<()> {
    let mut voice = VoiceControl::default();

    while let Some(msg_result) = socket_rx.next().await {
        let ws_msg = match msg_result {
            Ok(msg) => msg,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };
        // Any inbound frame counts as liveness, pong replies included.
        state.registry.touch(session_id).await;

        match ws_msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::UserMessage { text }) => {
                    cycle::handle_user_message(state, session_id, user_id, tier, &text).await?;
                }
                Ok(ClientMessage::VoiceStart) => {
                    voice.start(state, session_id, user_id).await?;
                }
                Ok(ClientMessage::VoiceChunk { seq, data }) => {
                    voice.chunk(state, session_id, seq, &data).await?;
                }
                Ok(ClientMessage::VoiceStop) => {
                    voice.stop(state, session_id, user_id, tier).await?;
                }
                Ok(ClientMessage::Init { .. }) => {
                    warn!("Ignoring duplicate init message.");
                }
                Err(_) => warn!("Ignoring unparseable client message."),
            },
            Message::Binary(_) => {
                warn!("Unexpected binary frame; audio must arrive as voice_chunk messages.");
            }
            Message::Close(_) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // A disconnect never cancels in-flight transcription; the recording is
    // drained in the background instead.
    voice.abandon(state);
    state.registry.unregister(session_id).await;
    Ok(())
}

/// Pumps queued outbound frames onto the socket until the channel closes
/// (unregistration) or the transport dies.
async fn run_writer(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let sent = match frame {
            Outbound::Event(msg) => match serde_json::to_string(&msg) {
                Ok(json) => socket_tx.send(Message::Text(json.into())).await,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            },
            Outbound::Ping => socket_tx.send(Message::Ping(Vec::new().into())).await,
        };
        if sent.is_err() {
            // Transport is gone; the registry prunes the session on its next
            // send or heartbeat sweep.
            break;
        }
    }
}

/// Serializes and sends a message directly, bypassing the registry. Only
/// used before a session is registered.
async fn send_direct(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
