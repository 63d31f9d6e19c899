//! Room identifiers: the three broadcast scopes.
//!
//! A room is a named broadcast group of connections. It is never a stored
//! entity: per-user and per-group rooms are derived from the identity
//! snapshot at registration, and per-chat rooms are joined on demand. The
//! wire rendering is `user:<id>`, `group:<id>`, or `chat:<id>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, GroupId, UserId};

/// A room identifier, scoped by kind.
///
/// Kept as a tagged union rather than a raw string so a new room kind is a
/// compile-time decision and match arms stay exhaustive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoomId {
    /// Per-user room: every live connection of one user.
    User(UserId),
    /// Per-group room: every connection of a group's members.
    Group(GroupId),
    /// Per-chat room: every connection subscribed to one chat.
    Chat(ChatId),
}

/// Error returned when a room string does not parse.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid room id: {0}")]
pub struct ParseRoomError(pub String);

impl RoomId {
    /// Room for a single user's connections.
    #[must_use]
    pub fn user(id: impl Into<UserId>) -> Self {
        Self::User(id.into())
    }

    /// Room for a group's members.
    #[must_use]
    pub fn group(id: impl Into<GroupId>) -> Self {
        Self::Group(id.into())
    }

    /// Room for a chat's subscribers.
    #[must_use]
    pub fn chat(id: impl Into<ChatId>) -> Self {
        Self::Chat(id.into())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Chat(id) => write!(f, "chat:{id}"),
        }
    }
}

impl FromStr for RoomId {
    type Err = ParseRoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Self::User(UserId::from(id))),
            Some(("group", id)) if !id.is_empty() => Ok(Self::Group(GroupId::from(id))),
            Some(("chat", id)) if !id.is_empty() => Ok(Self::Chat(ChatId::from(id))),
            _ => Err(ParseRoomError(s.to_owned())),
        }
    }
}

impl TryFrom<String> for RoomId {
    type Error = ParseRoomError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
