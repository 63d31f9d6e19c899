//! Inbound event dispatch.
//!
//! One router instance serves every connection; per-connection ordering
//! comes from each socket's single receive loop calling [`EventRouter::dispatch`]
//! frame by frame.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument};

use huddle_core::RoomId;

use crate::connection::ClientConnection;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::sessions::SessionManager;

/// Routes parsed client events to session-manager operations and room
/// broadcasts.
pub struct EventRouter {
    sessions: Arc<SessionManager>,
}

impl EventRouter {
    /// Create a router over a session manager.
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// The session manager this router broadcasts through.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Handle one inbound text frame from a connection.
    ///
    /// The sender identity on anything broadcast is always the
    /// connection's authenticated user, never anything payload-supplied.
    /// Malformed frames earn the origin an `error` event; unrecognized
    /// event names are dropped without a reply.
    #[instrument(skip_all, fields(conn_id = %origin.id, user_id = %origin.user_id))]
    pub async fn dispatch(&self, text: &str, origin: &Arc<ClientConnection>) {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "dropping malformed frame");
                let _ = origin.send_event(&ServerEvent::error(e.to_string()));
                return;
            }
        };
        counter!("realtime_events_total", "event" => event.name().to_owned()).increment(1);
        match event {
            ClientEvent::MessageSend(payload) => {
                let kind = payload.kind.as_deref().unwrap_or("text");
                let out = ServerEvent::message_receive(
                    &payload.chat_id,
                    &origin.user_id,
                    &payload.content,
                    kind,
                    &payload.attachments,
                );
                self.sessions
                    .emit(&RoomId::Chat(payload.chat_id), &out, Some(&origin.id))
                    .await;
            }
            ClientEvent::TypingStart(payload) => {
                let out = ServerEvent::typing_update(&payload.chat_id, &origin.user_id, true);
                self.sessions
                    .emit(&RoomId::Chat(payload.chat_id), &out, Some(&origin.id))
                    .await;
            }
            ClientEvent::TypingStop(payload) => {
                let out = ServerEvent::typing_update(&payload.chat_id, &origin.user_id, false);
                self.sessions
                    .emit(&RoomId::Chat(payload.chat_id), &out, Some(&origin.id))
                    .await;
            }
            ClientEvent::MessageRead(payload) => {
                let out = ServerEvent::message_read_update(
                    &payload.chat_id,
                    &payload.message_id,
                    &origin.user_id,
                );
                self.sessions
                    .emit(&RoomId::Chat(payload.chat_id), &out, Some(&origin.id))
                    .await;
            }
            ClientEvent::GroupJoin(payload) => {
                self.sessions
                    .join_room(&origin.id, RoomId::Group(payload.group_id))
                    .await;
            }
            ClientEvent::GroupLeave(payload) => {
                self.sessions
                    .leave_room(&origin.id, &RoomId::Group(payload.group_id))
                    .await;
            }
            ClientEvent::Unknown(name) => {
                debug!(event = name, "ignoring unknown event");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
