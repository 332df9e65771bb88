use dashmap::DashMap;
use ombud_common::protocol::Envelope;
use ombud_common::Identity;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handle held in the session table — used to deliver envelopes to a
/// connection and to force-close it when it is superseded.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Channel sender for delivering envelopes to this connection's task.
    pub tx: mpsc::Sender<Envelope>,
    /// Authenticated identity bound to this connection.
    pub identity: Identity,
    /// Instant when this connection authenticated (used as an epoch so a
    /// superseded connection's cleanup cannot evict its replacement).
    pub connected_at: Instant,
    /// Cancelled when a newer connection takes over this identity.
    pub cancel: CancellationToken,
}

/// Concurrent identity id → session table.
///
/// At most one live entry per identity id: a later authentication with
/// the same id replaces the earlier entry.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: DashMap<String, SessionHandle>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Inserts a session handle keyed by its identity id, returning any
    /// previous handle for the same identity.
    #[must_use]
    pub fn insert(&self, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(handle.identity.id.clone(), handle)
    }

    /// Removes the entry only if it belongs to the connection that
    /// authenticated at the given instant.
    pub fn remove_if(&self, identity_id: &str, connected_at: Instant) {
        self.sessions
            .remove_if(identity_id, |_k, v| v.connected_at == connected_at);
    }

    /// Looks up a session handle by identity id. `None` means offline.
    #[must_use]
    pub fn get(&self, identity_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(identity_id)
            .map(|entry| entry.value().clone())
    }

    /// Invokes `f` for every registered administrator session.
    ///
    /// Handles are snapshotted before the callback runs, so `f` may
    /// mutate the registry; sessions registering mid-iteration may be
    /// missed. Order is unspecified.
    pub fn for_each_admin<F: FnMut(&SessionHandle)>(&self, mut f: F) {
        let admins: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|entry| entry.identity.role.is_admin())
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &admins {
            f(handle);
        }
    }

    /// Invokes `f` for every registered session, with the same snapshot
    /// semantics as [`Registry::for_each_admin`].
    pub fn for_each<F: FnMut(&SessionHandle)>(&self, mut f: F) {
        let sessions: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &sessions {
            f(handle);
        }
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
