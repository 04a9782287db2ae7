//! WebSocket bridge between one client connection and one session.
//!
//! Binary frames carry little-endian 16-bit mono PCM, text frames carry JSON
//! control messages. Outbound frames are written by a dedicated task fed by
//! a bounded channel, so the session never waits on a slow client.

use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use parley_types::{
    ClientMessage, ErrorCode, InboundFrame, OutboundFrame, ServerMessage, SessionState,
};
use parley_voice::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

/// Maximum size of one inbound WebSocket message (1 MiB).
const MAX_WS_MESSAGE_BYTES: usize = 1024 * 1024;

/// Capacity of the channel between the socket reader and the session.
const INBOUND_CAPACITY: usize = 256;

/// Sessions with an open connection, keyed by session id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, watch::Receiver<SessionState>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, id: Uuid, state: watch::Receiver<SessionState>) {
        self.sessions.write().await.insert(id, state);
    }

    pub async fn remove(&self, id: &Uuid) {
        self.sessions.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Number of sessions currently speaking a reply.
    pub async fn responding(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|rx| *rx.borrow() == SessionState::Responding)
            .count()
    }
}

/// WebSocket handler: `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sends an error frame without waiting.
fn send_ws_error(tx: &mpsc::Sender<OutboundFrame>, code: ErrorCode, message: String) {
    if let Err(e) = tx.try_send(ServerMessage::error(code, message).into()) {
        tracing::warn!("failed to send WebSocket error to client: {}", e);
    }
}

/// Encodes an outbound frame as a WebSocket message.
fn encode_frame(frame: OutboundFrame) -> Option<AxumMessage> {
    match frame {
        OutboundFrame::Message(message) => match serde_json::to_string(&message) {
            Ok(json) => Some(AxumMessage::Text(json.into())),
            Err(e) => {
                tracing::error!("failed to serialize WebSocket message: {}", e);
                None
            }
        },
        OutboundFrame::Audio(pcm) => Some(AxumMessage::Binary(pcm.into())),
    }
}

/// Handles the WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let capacity = state.pipeline.session.outbound_capacity.max(1);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(capacity);

    let session = match Session::new(
        state.pipeline.clone(),
        state.collaborators.clone(),
        outbound_tx.clone(),
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("failed to create session: {}", e);
            let message = ServerMessage::error(ErrorCode::Internal, "session could not be created");
            if let Some(msg) = encode_frame(message.into()) {
                let _ = socket.send(msg).await;
            }
            return;
        }
    };

    let session_id = session.id();
    state.sessions.add(session_id, session.subscribe_state()).await;
    tracing::info!(session_id = %session_id, "websocket connected");

    let (mut sender, receiver) = socket.split();

    // Forward outbound frames to the socket until every sender is gone.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Some(msg) = encode_frame(frame) else {
                continue;
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(INBOUND_CAPACITY);
    let mut session_task = tokio::spawn(session.run(inbound_rx));
    let reader = read_frames(receiver, inbound_tx, outbound_tx.clone(), session_id);

    // The session ends either on its own (idle timeout) or after the client
    // goes away and the reader drops the inbound sender.
    let history = tokio::select! {
        result = &mut session_task => result,
        () = reader => session_task.await,
    };

    drop(outbound_tx);
    if let Err(e) = send_task.await {
        tracing::warn!(session_id = %session_id, "websocket writer task failed: {}", e);
    }
    state.sessions.remove(&session_id).await;

    match history {
        Ok(turns) => tracing::info!(
            session_id = %session_id,
            turns = turns.len(),
            "websocket disconnected"
        ),
        Err(e) => tracing::error!(session_id = %session_id, "session task failed: {}", e),
    }
}

/// Reads client frames into the session until the client disconnects or the
/// session stops accepting input.
async fn read_frames(
    mut receiver: SplitStream<WebSocket>,
    inbound_tx: mpsc::Sender<InboundFrame>,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    session_id: Uuid,
) {
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session_id = %session_id, "websocket receive error: {}", e);
                break;
            }
        };

        let frame = match msg {
            AxumMessage::Binary(bytes) => InboundFrame::Audio(bytes.to_vec()),
            AxumMessage::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(message) => InboundFrame::Control(message),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "unparseable control message: {}", e);
                    send_ws_error(
                        &outbound_tx,
                        ErrorCode::BadMessage,
                        format!("unrecognised control message: {}", e),
                    );
                    continue;
                }
            },
            AxumMessage::Close(_) => break,
            // Ping/pong are answered by axum.
            _ => continue,
        };

        if inbound_tx.send(frame).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_counts_responding_sessions() {
        let registry = SessionRegistry::new();
        let (first_tx, first_rx) = watch::channel(SessionState::Listening);
        let (_second_tx, second_rx) = watch::channel(SessionState::Idle);
        let first = Uuid::new_v4();
        registry.add(first, first_rx).await;
        registry.add(Uuid::new_v4(), second_rx).await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.responding().await, 0);

        first_tx.send_replace(SessionState::Responding);
        assert_eq!(registry.responding().await, 1);

        registry.remove(&first).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.responding().await, 0);
    }
}
