//! Live connection tracking: connection id → user identity.

use crate::error::FanoutError;
use crate::models::UserIdentity;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Transport-assigned id of one live connection; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract the `user` query parameter from a handshake query string.
///
/// The first `user=` pair wins. Missing or malformed input resolves to the
/// anonymous identity (empty string).
pub fn resolve_identity(query: &str) -> UserIdentity {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "user")
        .map(|(_, value)| {
            urlencoding::decode(value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| value.to_string())
        })
        .unwrap_or_default()
}

/// Registry of open connections and their resolved identities.
///
/// Entries are sharded per key, so open/close on one id never contends with
/// other connections.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<ConnectionId, UserIdentity>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve and record the identity for a connection that just opened.
    pub fn on_open(&self, connection_id: ConnectionId, handshake_query: &str) -> UserIdentity {
        let identity = resolve_identity(handshake_query);
        self.inner.insert(connection_id, identity.clone());

        tracing::debug!(
            connection_id = %connection_id,
            user = %identity,
            sessions = self.inner.len(),
            "Session opened"
        );

        identity
    }

    pub fn lookup(&self, connection_id: &ConnectionId) -> Result<UserIdentity, FanoutError> {
        self.inner
            .get(connection_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FanoutError::NotFound(connection_id.to_string()))
    }

    /// Forget a connection. Closing twice is a no-op.
    pub fn on_close(&self, connection_id: &ConnectionId) {
        if let Some((_, identity)) = self.inner.remove(connection_id) {
            tracing::debug!(
                connection_id = %connection_id,
                user = %identity,
                sessions = self.inner.len(),
                "Session closed"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
