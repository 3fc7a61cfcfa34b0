//! Message ownership and delivery/read receipts.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Kind of receipt a participant can record for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivered,
    Seen,
}

/// Where a tracked message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOrigin {
    pub owner: String,
    pub chat_id: String,
}

#[derive(Default)]
struct LedgerState {
    origins: HashMap<String, MessageOrigin>,
    delivered_by: HashMap<String, HashSet<String>>,
    seen_by: HashMap<String, HashSet<String>>,
}

/// Tracks who sent each message and who has delivered or seen it.
///
/// Ownership is write-once; receipt sets only grow. Everything here is
/// process-local and lost on restart.
pub struct ReceiptLedger {
    state: RwLock<LedgerState>,
}

impl ReceiptLedger {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Record the sender of a message. The first write wins; repeats for
    /// the same id are ignored.
    pub async fn record_ownership(&self, message_id: &str, owner: &str, chat_id: &str) {
        let mut state = self.state.write().await;
        state
            .origins
            .entry(message_id.to_string())
            .or_insert_with(|| MessageOrigin {
                owner: owner.to_string(),
                chat_id: chat_id.to_string(),
            });
    }

    /// Owner and chat of a message, if ownership was recorded.
    pub async fn origin_of(&self, message_id: &str) -> Option<MessageOrigin> {
        self.state.read().await.origins.get(message_id).cloned()
    }

    /// Record a receipt. Returns `true` when the receipt is new; repeats,
    /// receipts for untracked messages, and the owner's own receipts are
    /// all no-ops.
    pub async fn record_receipt(
        &self,
        message_id: &str,
        identity: &str,
        kind: ReceiptKind,
    ) -> bool {
        let mut state = self.state.write().await;
        match state.origins.get(message_id) {
            Some(origin) if origin.owner != identity => {}
            Some(_) => return false,
            None => {
                debug!("Receipt for untracked message {} ignored", message_id);
                return false;
            }
        }
        let set = match kind {
            ReceiptKind::Delivered => state.delivered_by.entry(message_id.to_string()),
            ReceiptKind::Seen => state.seen_by.entry(message_id.to_string()),
        };
        set.or_default().insert(identity.to_string())
    }

    /// `(delivered, seen)` counts for a message.
    pub async fn receipt_counts(&self, message_id: &str) -> (usize, usize) {
        let state = self.state.read().await;
        let delivered = state
            .delivered_by
            .get(message_id)
            .map(HashSet::len)
            .unwrap_or(0);
        let seen = state.seen_by.get(message_id).map(HashSet::len).unwrap_or(0);
        (delivered, seen)
    }

    /// Messages owned by `identity` paired with the identities that have
    /// seen them, for reconnect replay. Both levels are sorted so replay
    /// order is stable.
    pub async fn seen_receipts_for_owner(&self, identity: &str) -> Vec<(String, Vec<String>)> {
        let state = self.state.read().await;
        let mut owned = Vec::new();
        for (message_id, origin) in &state.origins {
            if origin.owner != identity {
                continue;
            }
            let Some(seen) = state.seen_by.get(message_id) else {
                continue;
            };
            if seen.is_empty() {
                continue;
            }
            let mut seen: Vec<String> = seen.iter().cloned().collect();
            seen.sort();
            owned.push((message_id.clone(), seen));
        }
        owned.sort_by(|a, b| a.0.cmp(&b.0));
        owned
    }
}

impl Default for ReceiptLedger {
    fn default() -> Self {
        Self::new()
    }
}
