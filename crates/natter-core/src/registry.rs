//! Connection registry: which identities are reachable right now.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::event::ServerEvent;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle identifying one live connection.
///
/// Equality of connections is always by id, never by content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Capability surface the delivery core needs from a live connection.
///
/// Transports implement this over their outbound path. A failed `send`
/// marks the connection dead; the caller prunes it from the registry.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Stable id for registry bookkeeping.
    fn id(&self) -> ConnectionId;

    /// Queue one event for delivery to the peer.
    async fn send(&self, event: &ServerEvent) -> Result<()>;

    /// Close the underlying transport with a close code and reason.
    async fn close(&self, code: u16, reason: &str) -> Result<()>;
}

type ConnectionMap = HashMap<String, HashMap<ConnectionId, Arc<dyn Connection>>>;

/// Live connections per identity, multi-device aware.
///
/// An identity is present exactly while it has at least one open
/// connection; the entry disappears with its last connection.
pub struct ConnectionRegistry {
    connections: RwLock<ConnectionMap>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under an identity. Returns `true` when this
    /// is the identity's first live connection.
    pub async fn connect(&self, identity: &str, connection: Arc<dyn Connection>) -> bool {
        let id = connection.id();
        let mut connections = self.connections.write().await;
        let entry = connections.entry(identity.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(id, connection);
        debug!("Registered {} for {} ({} device(s))", id, identity, entry.len());
        first
    }

    /// Remove one connection, or all of them with `None`. Returns `true`
    /// when the identity has no connections left afterwards.
    pub async fn disconnect(&self, identity: &str, connection: Option<ConnectionId>) -> bool {
        let mut connections = self.connections.write().await;
        let Some(entry) = connections.get_mut(identity) else {
            return false;
        };
        match connection {
            Some(id) => {
                entry.remove(&id);
            }
            None => entry.clear(),
        }
        if entry.is_empty() {
            connections.remove(identity);
            debug!("{} has no connections left", identity);
            true
        } else {
            false
        }
    }

    /// True while the identity has at least one live connection.
    pub async fn is_connected(&self, identity: &str) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    /// Snapshot of every (identity, connection) pair, for a fanout sweep.
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn Connection>)> {
        let connections = self.connections.read().await;
        let mut pairs = Vec::new();
        for (identity, conns) in connections.iter() {
            for conn in conns.values() {
                pairs.push((identity.clone(), conn.clone()));
            }
        }
        pairs
    }

    /// Snapshot of one identity's connections.
    pub async fn connections_of(&self, identity: &str) -> Vec<Arc<dyn Connection>> {
        let connections = self.connections.read().await;
        connections
            .get(identity)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Currently connected identities.
    pub async fn identities(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Number of connected identities other than `exclude`.
    pub async fn other_identity_count(&self, exclude: &str) -> usize {
        self.connections
            .read()
            .await
            .keys()
            .filter(|identity| identity.as_str() != exclude)
            .count()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
