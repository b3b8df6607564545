// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! One live client connection.
//!
//! `Connected -> (joined rooms)* -> Disconnected`. Closing, explicitly or by
//! dropping the session, removes the connection from every room it joined.
//! A reconnect is a brand new session.
use crate::chat::{self, ChatError, OutgoingMessage};
use crate::database;
use crate::rooms::{ConnectionId, Outbound, RoomId};
use crate::state::AppState;
use streak_common::{ChatMessage, ClientEvent, RejectReason, ServerEvent};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session is closed.")]
    Closed,
    #[error("Group with ID {0} not found.")]
    GroupNotFound(RoomId),
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl SessionError {
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::Closed => RejectReason::SessionClosed,
            Self::GroupNotFound(_) => RejectReason::NotFound,
            Self::Chat(err) => err.reason(),
            Self::Persistence(_) => RejectReason::PersistenceFailure,
        }
    }

    // Store details stay in the logs.
    fn client_message(&self) -> String {
        match self.reason() {
            RejectReason::PersistenceFailure => "An internal error occurred.".to_string(),
            _ => self.to_string(),
        }
    }
}

pub struct ConnectionSession {
    id: ConnectionId,
    user_id: String,
    state: SessionState,
    app: AppState,
    outbound: Outbound,
}

impl ConnectionSession {
    /// Registers a new connection for `user_id` whose events go to `outbound`.
    pub fn open(app: AppState, user_id: String, outbound: Outbound) -> Self {
        let id = app.rooms.connect(outbound.clone());
        info!(connection = %id, user_id = %user_id, "session opened");
        Self {
            id,
            user_id,
            state: SessionState::Connected,
            app,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn rooms(&self) -> Vec<RoomId> {
        self.app.rooms.rooms_of(self.id)
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(SessionError::Closed),
        }
    }

    /// Joins the live room of an existing group. Joining twice is a no-op.
    pub async fn join_room(&self, group_id: RoomId) -> Result<bool, SessionError> {
        self.ensure_connected()?;
        if !database::group_exists(&self.app.pool, group_id).await? {
            return Err(SessionError::GroupNotFound(group_id));
        }
        // The registry only refuses connections that were already dropped.
        let added = self
            .app
            .rooms
            .join(self.id, group_id)
            .map_err(|_| SessionError::Closed)?;
        debug!(connection = %self.id, group_id, added, "joined room");
        Ok(added)
    }

    pub fn leave_room(&self, group_id: RoomId) -> Result<bool, SessionError> {
        self.ensure_connected()?;
        let removed = self.app.rooms.leave(self.id, group_id);
        debug!(connection = %self.id, group_id, removed, "left room");
        Ok(removed)
    }

    /// Sends a chat message as this session's user.
    pub async fn send_message(
        &self,
        group_id: RoomId,
        display_name: &str,
        body: &str,
    ) -> Result<ChatMessage, SessionError> {
        self.ensure_connected()?;
        let message = OutgoingMessage {
            room: group_id,
            author_id: &self.user_id,
            display_name,
            body,
        };
        Ok(chat::send_message(
            &self.app.pool,
            &self.app.rooms,
            self.id,
            message,
            self.app.max_message_len,
        )
        .await?)
    }

    /// Pushes an event to this connection only.
    pub fn notify(&self, event: ServerEvent) -> bool {
        if self.outbound.send(event).is_err() {
            warn!(connection = %self.id, "connection outbound channel closed");
            return false;
        }
        true
    }

    /// Applies one client event and answers on this connection.
    pub async fn handle(&self, event: ClientEvent) {
        let reply = match event {
            ClientEvent::JoinRoom { group_id } => self
                .join_room(group_id)
                .await
                .map(|_| ServerEvent::Joined { group_id })
                .map_err(|err| (err, group_id)),
            ClientEvent::LeaveRoom { group_id } => self
                .leave_room(group_id)
                .map(|_| ServerEvent::Left { group_id })
                .map_err(|err| (err, group_id)),
            ClientEvent::SendMessage {
                group_id,
                display_name,
                body,
            } => self
                .send_message(group_id, &display_name, &body)
                .await
                .map(|message| ServerEvent::Sent {
                    group_id,
                    message_id: message.id,
                })
                .map_err(|err| (err, group_id)),
        };

        let event = reply.unwrap_or_else(|(err, group_id)| {
            debug!(connection = %self.id, group_id, error = %err, "event rejected");
            ServerEvent::Error {
                code: err.reason(),
                message: err.client_message(),
                group_id: Some(group_id),
            }
        });
        self.notify(event);
    }

    /// Moves to `Disconnected` and leaves every room. Returns the rooms left.
    pub fn close(&mut self) -> Vec<RoomId> {
        if self.state == SessionState::Disconnected {
            return Vec::new();
        }
        self.state = SessionState::Disconnected;
        let left = self.app.rooms.drop_connection(self.id);
        info!(connection = %self.id, user_id = %self.user_id, rooms = ?left, "session closed");
        left
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
