//! Identity gate: resolves a bearer credential to a user identity and a
//! group-membership snapshot.
//!
//! Token verification itself (JWT or otherwise) lives behind this trait in
//! the request/response layer; the realtime core only cares that a
//! credential either resolves or the connection is rejected before any room
//! join.

use async_trait::async_trait;

use huddle_core::{GroupId, UserId};

/// A resolved identity: the user plus their group memberships at the moment
/// of authentication.
///
/// The membership list is a snapshot. A user who joins a group mid-session
/// is not auto-subscribed to its room; the client must send `group:join`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// The authenticated user.
    pub user_id: UserId,
    /// Groups the user belonged to when the credential was resolved.
    pub group_ids: Vec<GroupId>,
}

/// Errors resolving a connection credential.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential was supplied at connect time.
    #[error("authentication error: missing token")]
    MissingToken,

    /// The credential did not verify or is not known.
    #[error("authentication error: invalid token")]
    InvalidToken,

    /// The credential verified but the user record no longer exists.
    #[error("authentication error: user not found")]
    UserNotFound,
}

/// Resolves credentials and user display identities.
#[async_trait]
pub trait IdentityGate: Send + Sync {
    /// Resolve a bearer token to an identity, or fail the connection.
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;

    /// Resolve a user ID to a display name, if known.
    async fn display_name(&self, user: &UserId) -> Option<String>;
}

/// One registered user in the in-memory gate.
#[derive(Clone, Debug)]
struct UserRecord {
    display_name: String,
    group_ids: Vec<GroupId>,
}

/// In-memory [`IdentityGate`] keyed by opaque tokens.
///
/// Used by tests and as the default wiring when no external identity
/// service is configured. Tokens map to user IDs, user IDs to records, so
/// a revoked user with a live token still fails with `UserNotFound`.
#[derive(Default)]
pub struct InMemoryIdentityGate {
    tokens: parking_lot::RwLock<std::collections::HashMap<String, UserId>>,
    users: parking_lot::RwLock<std::collections::HashMap<UserId, UserRecord>>,
}

impl InMemoryIdentityGate {
    /// Create an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user record.
    pub fn insert_user(
        &self,
        user: UserId,
        display_name: impl Into<String>,
        group_ids: Vec<GroupId>,
    ) {
        let _ = self.users.write().insert(
            user,
            UserRecord {
                display_name: display_name.into(),
                group_ids,
            },
        );
    }

    /// Bind a token to a user.
    pub fn insert_token(&self, token: impl Into<String>, user: UserId) {
        let _ = self.tokens.write().insert(token.into(), user);
    }

    /// Remove a user record, leaving any tokens dangling.
    pub fn remove_user(&self, user: &UserId) {
        let _ = self.users.write().remove(user);
    }
}

#[async_trait]
impl IdentityGate for InMemoryIdentityGate {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let user_id = self
            .tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)?;
        let record = self
            .users
            .read()
            .get(&user_id)
            .cloned()
            .ok_or(AuthError::UserNotFound)?;
        Ok(Identity {
            user_id,
            group_ids: record.group_ids,
        })
    }

    async fn display_name(&self, user: &UserId) -> Option<String> {
        self.users.read().get(user).map(|r| r.display_name.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
