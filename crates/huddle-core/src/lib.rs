//! # huddle-core
//!
//! Foundation types for the huddle collaboration backend.
//!
//! This crate provides the shared vocabulary that the realtime and workflow
//! crates depend on:
//!
//! - **Branded IDs**: `UserId`, `GroupId`, `ChatId`, etc. as newtypes for
//!   type safety
//! - **Rooms**: `RoomId`, the three broadcast scopes (per-user, per-group,
//!   per-chat) as a tagged union
//! - **Presence**: `PresenceState`, a user's online/offline/away status

#![deny(unsafe_code)]

pub mod ids;
pub mod presence;
pub mod rooms;

pub use ids::{ChatId, ConnectionId, GroupId, MessageId, UserId, WorkflowId};
pub use presence::PresenceState;
pub use rooms::RoomId;
