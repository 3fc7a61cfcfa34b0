//! In-memory message history for reconnect replay.

use std::collections::VecDeque;

use tokio::sync::RwLock;

use crate::event::MessagePayload;

/// Ordered buffer of delivered messages, oldest first.
///
/// Never durable: a process restart starts empty. With a cap set, the
/// oldest entries are dropped as new ones arrive.
pub struct HistoryBuffer {
    cap: Option<usize>,
    messages: RwLock<VecDeque<MessagePayload>>,
}

impl HistoryBuffer {
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            cap,
            messages: RwLock::new(VecDeque::new()),
        }
    }

    /// Append one message, evicting the oldest past the cap.
    pub async fn push(&self, message: MessagePayload) {
        let mut messages = self.messages.write().await;
        messages.push_back(message);
        if let Some(cap) = self.cap {
            while messages.len() > cap {
                messages.pop_front();
            }
        }
    }

    /// Snapshot of the buffer, oldest first.
    pub async fn snapshot(&self) -> Vec<MessagePayload> {
        self.messages.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}
