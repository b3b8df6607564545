// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A daily habit owned by one user.
///
/// `streak_count` only moves through the completion operation, and a
/// positive streak always comes with a `last_completed_at` day.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Task {
    pub id: i64,

    /// Opaque reference to the owning user.
    pub user_id: String,

    pub title: String,

    pub description: Option<String>,

    pub created_at: DateTime<Utc>,

    pub streak_count: u32,

    // Day granularity only; the time of day is never stored.
    pub last_completed_at: Option<NaiveDate>,
}

/// Body of `POST /api/tasks`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CreateTaskPayload {
    pub title: String,
    pub description: Option<String>,
}

/// A named group users can join and chat in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub creator_id: String,
    /// Persisted members, the creator included. Order carries no meaning.
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Body of `POST /api/groups`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CreateGroupPayload {
    pub name: String,
    pub description: String,
}

/// A persisted chat message. Immutable once stored.
///
/// `display_name` is the author's name as it was when the message was sent;
/// it is a snapshot and is never re-resolved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub group_id: i64,
    pub author_id: String,
    pub display_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Stable, machine-readable rejection codes shared by the REST and
/// real-time surfaces.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotFound,
    NotAuthorized,
    AlreadyCompletedToday,
    DuplicateGroupName,
    AlreadyMember,
    Validation,
    NotJoined,
    EmptyBody,
    PersistenceFailure,
    TransportFailure,
    SessionClosed,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::NotAuthorized => "not_authorized",
            Self::AlreadyCompletedToday => "already_completed_today",
            Self::DuplicateGroupName => "duplicate_group_name",
            Self::AlreadyMember => "already_member",
            Self::Validation => "validation",
            Self::NotJoined => "not_joined",
            Self::EmptyBody => "empty_body",
            Self::PersistenceFailure => "persistence_failure",
            Self::TransportFailure => "transport_failure",
            Self::SessionClosed => "session_closed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events a client sends over the real-time channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        group_id: i64,
    },
    LeaveRoom {
        group_id: i64,
    },
    SendMessage {
        group_id: i64,
        display_name: String,
        body: String,
    },
}

/// Events the server pushes to a connected client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Joined {
        group_id: i64,
    },
    Left {
        group_id: i64,
    },
    /// Room broadcast of a stored message. The sender receives it too.
    ChatMessage(ChatMessage),
    /// Acknowledges a `send_message` once the message is stored and fanned out.
    Sent {
        group_id: i64,
        message_id: i64,
    },
    Error {
        code: RejectReason,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<i64>,
    },
}
