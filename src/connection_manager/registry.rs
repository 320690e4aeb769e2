use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use super::types::{Connection, ConnectionId, RegistryError};

/// Authoritative set of currently-bridged connections.
pub struct ConnectionRegistry {
    /// connection_id -> Connection
    connections: DashMap<ConnectionId, Arc<Connection>>,
    /// Live count, republished after every mutation
    count_tx: watch::Sender<usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            connections: DashMap::new(),
            count_tx,
        }
    }

    /// Register a new connection
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        match self.connections.entry(connection.id.clone()) {
            Entry::Occupied(entry) => {
                return Err(RegistryError::DuplicateId(entry.key().clone()));
            }
            Entry::Vacant(entry) => {
                entry.insert(connection.clone());
            }
        }
        self.publish_count();

        tracing::debug!(connection_id = %connection.id, "Connection registered");
        Ok(())
    }

    /// Unregister a connection.
    ///
    /// `NotFound` is an expected race with a concurrent close; callers should
    /// swallow it.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Result<Arc<Connection>, RegistryError> {
        let (_, connection) = self
            .connections
            .remove(connection_id)
            .ok_or_else(|| RegistryError::NotFound(connection_id.clone()))?;
        self.publish_count();

        tracing::debug!(connection_id = %connection_id, "Connection unregistered");
        Ok(connection)
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Copy of the connections registered at call time.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Visit every connection registered at call time.
    ///
    /// Runs over a snapshot, so `f` may register or unregister freely.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Connection>),
    {
        for connection in self.snapshot() {
            f(&connection);
        }
    }

    /// Resolves once no connection is registered.
    pub async fn wait_empty(&self) {
        let mut rx = self.count_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn publish_count(&self) {
        // Read the length under the watch lock so the last publisher always
        // observes the latest mutation
        self.count_tx
            .send_modify(|count| *count = self.connections.len());
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
