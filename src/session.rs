//! Registry of live connections.
//!
//! `SessionRegistry` stores non-owning weak references to connections,
//! allowing a server to enumerate or close verified sessions without keeping
//! finished connections alive. Dead entries can be pruned opportunistically or
//! lazily at lookup time.
use std::sync::Weak;

use dashmap::DashMap;

use crate::connection::{Connection, ConnectionId, ConnectionInner};

/// Concurrent registry of connections keyed by [`ConnectionId`].
#[derive(Default)]
pub struct SessionRegistry(DashMap<ConnectionId, Weak<ConnectionInner>>);

impl SessionRegistry {
    /// Retrieve the connection for `id` if it is still alive.
    pub fn get(&self, id: &ConnectionId) -> Option<Connection> {
        let guard = self.0.get(id);
        let inner = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if inner.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        inner.map(Connection::from_inner)
    }

    /// Insert a newly verified connection.
    pub fn insert(&self, conn: &Connection) { self.0.insert(conn.id(), conn.downgrade()); }

    /// Remove a connection, typically on teardown.
    pub fn remove(&self, id: &ConnectionId) { self.0.remove(id); }

    /// Remove all stale weak references.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Number of entries, including any not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns true when no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Prune stale entries, then collect the remaining live connections.
    #[must_use]
    pub fn active_connections(&self) -> Vec<Connection> {
        let mut live = Vec::with_capacity(self.0.len());
        self.0.retain(|_, weak| {
            if let Some(inner) = weak.upgrade() {
                live.push(Connection::from_inner(inner));
                true
            } else {
                false
            }
        });
        live
    }

    /// Close every live connection.
    pub fn close_all(&self) {
        for conn in self.active_connections() {
            conn.close();
        }
    }
}
