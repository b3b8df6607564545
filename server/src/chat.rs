// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
//! Chat message pipeline: validate, persist, then fan out.
//!
//! Nothing is broadcast unless the message was stored first. Messages sent
//! in sequence by one connection reach every member in that sequence because
//! the connection awaits each send before reading the next event and each
//! member has a single ordered outbound channel.
use crate::database;
use crate::rooms::{ConnectionId, RoomId, RoomRegistry};
use sqlx::SqlitePool;
use streak_common::{ChatMessage, RejectReason, ServerEvent};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Join the room before sending messages to it.")]
    NotJoined,
    #[error("Message body cannot be empty.")]
    EmptyBody,
    #[error("Display name cannot be empty.")]
    MissingDisplayName,
    #[error("Message body exceeds {max} characters.")]
    TooLong { max: usize },
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl ChatError {
    pub fn reason(&self) -> RejectReason {
        match self {
            Self::NotJoined => RejectReason::NotJoined,
            Self::EmptyBody => RejectReason::EmptyBody,
            Self::MissingDisplayName | Self::TooLong { .. } => RejectReason::Validation,
            Self::Persistence(_) => RejectReason::PersistenceFailure,
        }
    }
}

/// One chat send, as received from a connection.
#[derive(Debug, Clone)]
pub struct OutgoingMessage<'a> {
    pub room: RoomId,
    pub author_id: &'a str,
    pub display_name: &'a str,
    pub body: &'a str,
}

/// Stores the message and delivers it to every connection in the room,
/// the sender included.
pub async fn send_message(
    pool: &SqlitePool,
    rooms: &RoomRegistry,
    connection: ConnectionId,
    message: OutgoingMessage<'_>,
    max_len: usize,
) -> Result<ChatMessage, ChatError> {
    if !rooms.is_member(connection, message.room) {
        debug!(connection = %connection, room = message.room, "send before join");
        return Err(ChatError::NotJoined);
    }
    if message.body.trim().is_empty() {
        return Err(ChatError::EmptyBody);
    }
    if message.body.chars().count() > max_len {
        return Err(ChatError::TooLong { max: max_len });
    }
    let display_name = message.display_name.trim();
    if display_name.is_empty() {
        return Err(ChatError::MissingDisplayName);
    }

    let stored = database::insert_chat_message(
        pool,
        message.room,
        message.author_id,
        display_name,
        message.body,
    )
    .await
    .map_err(|err| {
        error!(room = message.room, error = ?err, "chat message not stored, nothing broadcast");
        err
    })?;

    let delivered = rooms.broadcast(message.room, &ServerEvent::ChatMessage(stored.clone()));
    info!(
        room = message.room,
        message_id = stored.id,
        delivered,
        "chat message broadcast"
    );

    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const MAX_LEN: usize = 200;

    async fn group(pool: &SqlitePool, name: &str) -> i64 {
        database::create_group_in_db(pool, "u1", name, "desc")
            .await
            .unwrap()
            .unwrap()
            .id
    }

    fn open(rooms: &RoomRegistry) -> (ConnectionId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (rooms.connect(tx), rx)
    }

    fn msg(room: RoomId, body: &str) -> OutgoingMessage<'_> {
        OutgoingMessage {
            room,
            author_id: "u1",
            display_name: "ana",
            body,
        }
    }

    #[tokio::test]
    async fn test_message_is_stored_and_echoed_to_sender() {
        let pool = test_pool().await;
        let rooms = RoomRegistry::new();
        let room = group(&pool, "Runners").await;
        let (alice, mut alice_rx) = open(&rooms);
        let (bob, mut bob_rx) = open(&rooms);
        rooms.join(alice, room).unwrap();
        rooms.join(bob, room).unwrap();

        let stored = send_message(&pool, &rooms, alice, msg(room, "morning run done"), MAX_LEN)
            .await
            .unwrap();

        let expected = ServerEvent::ChatMessage(stored.clone());
        assert_eq!(alice_rx.try_recv().unwrap(), expected);
        assert_eq!(bob_rx.try_recv().unwrap(), expected);
        assert_eq!(stored.display_name, "ana");
        assert_eq!(stored.author_id, "u1");

        let history = database::list_group_messages(&pool, room, 10).await.unwrap();
        assert_eq!(history, vec![stored]);
    }

    #[tokio::test]
    async fn test_send_before_join_is_rejected() {
        let pool = test_pool().await;
        let rooms = RoomRegistry::new();
        let room = group(&pool, "Runners").await;
        let (alice, _alice_rx) = open(&rooms);
        let (bob, mut bob_rx) = open(&rooms);
        rooms.join(bob, room).unwrap();

        let result = send_message(&pool, &rooms, alice, msg(room, "hi"), MAX_LEN).await;
        assert!(matches!(result, Err(ChatError::NotJoined)));
        assert!(bob_rx.try_recv().is_err());
        assert!(database::list_group_messages(&pool, room, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_blank_body_is_rejected() {
        let pool = test_pool().await;
        let rooms = RoomRegistry::new();
        let room = group(&pool, "Runners").await;
        let (alice, mut alice_rx) = open(&rooms);
        rooms.join(alice, room).unwrap();

        for body in ["", "   ", "\n\t "] {
            let result = send_message(&pool, &rooms, alice, msg(room, body), MAX_LEN).await;
            let err = result.unwrap_err();
            assert_eq!(err.reason(), RejectReason::EmptyBody);
        }
        assert!(alice_rx.try_recv().is_err());
        assert!(database::list_group_messages(&pool, room, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_and_missing_name() {
        let pool = test_pool().await;
        let rooms = RoomRegistry::new();
        let room = group(&pool, "Runners").await;
        let (alice, _rx) = open(&rooms);
        rooms.join(alice, room).unwrap();

        let long = "x".repeat(MAX_LEN + 1);
        let err = send_message(&pool, &rooms, alice, msg(room, &long), MAX_LEN)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::TooLong { max: MAX_LEN }));

        let nameless = OutgoingMessage {
            display_name: "  ",
            ..msg(room, "hi")
        };
        let err = send_message(&pool, &rooms, alice, nameless, MAX_LEN)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), RejectReason::Validation);
    }

    #[tokio::test]
    async fn test_persistence_failure_broadcasts_nothing() {
        let pool = test_pool().await;
        let rooms = RoomRegistry::new();
        let room = group(&pool, "Runners").await;
        let (alice, mut alice_rx) = open(&rooms);
        let (bob, mut bob_rx) = open(&rooms);
        rooms.join(alice, room).unwrap();
        rooms.join(bob, room).unwrap();
        pool.close().await;

        let err = send_message(&pool, &rooms, alice, msg(room, "lost"), MAX_LEN)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), RejectReason::PersistenceFailure);
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sequential_messages_keep_their_order() {
        let pool = test_pool().await;
        let rooms = RoomRegistry::new();
        let room = group(&pool, "Runners").await;
        let (alice, _alice_rx) = open(&rooms);
        let (bob, mut bob_rx) = open(&rooms);
        rooms.join(alice, room).unwrap();
        rooms.join(bob, room).unwrap();

        let bodies: Vec<String> = (0..10).map(|i| format!("message {i}")).collect();
        for body in &bodies {
            send_message(&pool, &rooms, alice, msg(room, body), MAX_LEN)
                .await
                .unwrap();
        }

        for body in &bodies {
            match bob_rx.try_recv().unwrap() {
                ServerEvent::ChatMessage(received) => assert_eq!(&received.body, body),
                other => panic!("expected chat message, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let pool = test_pool().await;
        let rooms = RoomRegistry::new();
        let runners = group(&pool, "Runners").await;
        let readers = group(&pool, "Readers").await;
        let (alice, _alice_rx) = open(&rooms);
        let (bob, mut bob_rx) = open(&rooms);
        rooms.join(alice, runners).unwrap();
        rooms.join(bob, readers).unwrap();

        send_message(&pool, &rooms, alice, msg(runners, "hi"), MAX_LEN)
            .await
            .unwrap();
        assert!(bob_rx.try_recv().is_err());
    }
}
