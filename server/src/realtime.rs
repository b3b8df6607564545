// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! WebSocket transport for group chat.
//!
//! Each connection gets a reader task that owns the [`ConnectionSession`]
//! and a writer task that drains the session's outbound channel. Frames are
//! JSON-encoded [`ClientEvent`]s and [`ServerEvent`]s.
use crate::identity::CallerId;
use crate::session::ConnectionSession;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use streak_common::{ClientEvent, RejectReason, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Upgrades `GET /ws` to a WebSocket bound to the caller's identity.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    CallerId(user_id): CallerId,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

/// Runs one connection until either side goes away.
///
/// Whichever task ends first aborts the other; the session is closed either
/// way, which removes the connection from every room.
pub async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let mut session = ConnectionSession::open(state, user_id, tx);
    let connection = session.id();

    let mut write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(connection = %connection, error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                warn!(connection = %connection, "WebSocket write failed");
                break;
            }
        }
    });

    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(event) => session.handle(event).await,
                    Err(e) => {
                        debug!(connection = %connection, error = %e, "malformed client event");
                        session.notify(ServerEvent::Error {
                            code: RejectReason::Validation,
                            message: format!("Malformed event: {e}"),
                            group_id: None,
                        });
                    }
                },
                Message::Close(_) => {
                    info!(connection = %connection, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping and pong frames carry nothing for us.
                }
            }
        }
        session.close();
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    info!(connection = %connection, "connection finished");
}
