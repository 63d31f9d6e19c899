//! User presence state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A user's presence, derived from connection count plus idle policy.
///
/// Exactly one value per user at any time. Online/offline transitions are
/// driven by the session manager; `Away` is only ever set by an external
/// idle-timeout policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    /// At least one live connection.
    Online,
    /// No live connections.
    #[default]
    Offline,
    /// Connected but idle (externally driven).
    Away,
}

impl PresenceState {
    /// Whether any connection is live in this state.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Online | Self::Away)
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Away => "away",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
