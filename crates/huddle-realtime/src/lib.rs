//! # huddle-realtime
//!
//! The realtime messaging and presence core:
//!
//! - **Identity gate**: authenticates an inbound connection against a bearer
//!   credential before anything else happens
//! - **Session manager**: live connections, room subscriptions, and presence
//!   transitions
//! - **Event router**: dispatches inbound named events and fans out
//!   broadcasts to room subscribers
//! - **Protocol**: the wire format both directions
//!
//! Persistence of chats and messages is deliberately not here; the REST
//! layer owns it and calls back into [`SessionManager::emit`] for fan-out.

#![deny(unsafe_code)]

pub mod connection;
pub mod identity;
pub mod protocol;
pub mod router;
pub mod sessions;

pub use connection::ClientConnection;
pub use identity::{AuthError, Identity, IdentityGate, InMemoryIdentityGate};
pub use protocol::{ClientEvent, ProtocolError, ServerEvent};
pub use router::EventRouter;
pub use sessions::{PresenceChange, SessionManager};
