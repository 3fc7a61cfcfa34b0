//! Best-effort fanout over the connection registry.

use std::sync::Arc;

use tracing::warn;

use crate::event::ServerEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Fans events out to live connections.
///
/// Every sweep works on a snapshot of the registry: deliveries are
/// attempted first, failures collected, and the dead pairs pruned only
/// after the sweep finishes. The registry is never mutated mid-sweep.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `event` to every connection except the skipped identity
    /// and the skipped connection. Returns the identities that lost
    /// their last connection to pruning.
    pub async fn broadcast(
        &self,
        event: &ServerEvent,
        skip_identity: Option<&str>,
        skip_connection: Option<ConnectionId>,
    ) -> Vec<String> {
        let targets = self.registry.snapshot().await;
        let mut dead: Vec<(String, ConnectionId)> = Vec::new();

        for (identity, conn) in targets {
            if skip_identity == Some(identity.as_str()) {
                continue;
            }
            if skip_connection == Some(conn.id()) {
                continue;
            }
            if let Err(e) = conn.send(event).await {
                warn!("Dropping {} of {}: {}", conn.id(), identity, e);
                dead.push((identity, conn.id()));
            }
        }

        self.prune(dead).await
    }

    /// Deliver `event` to every connection of one identity. Returns
    /// `true` when pruning removed the identity's last connection.
    pub async fn send_to(&self, identity: &str, event: &ServerEvent) -> bool {
        let targets = self.registry.connections_of(identity).await;
        let mut dead = Vec::new();

        for conn in targets {
            if let Err(e) = conn.send(event).await {
                warn!("Dropping {} of {}: {}", conn.id(), identity, e);
                dead.push((identity.to_string(), conn.id()));
            }
        }

        !self.prune(dead).await.is_empty()
    }

    /// Disconnect collected failures; runs after the sweep so the
    /// membership seen by the sweep stays coherent.
    async fn prune(&self, dead: Vec<(String, ConnectionId)>) -> Vec<String> {
        let mut departed = Vec::new();
        for (identity, id) in dead {
            if self.registry.disconnect(&identity, Some(id)).await {
                departed.push(identity);
            }
        }
        departed
    }
}
