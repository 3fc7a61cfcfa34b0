//! Persistence and membership collaborators.
//!
//! The delivery core stays authoritative for the in-memory path; these
//! traits are the seams where durable storage and chat membership plug
//! in. Collaborator failures are logged by callers and never block
//! delivery.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{NatterError, Result};
use crate::status::MessageStatus;

/// A message row handed to the repository when it is first accepted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub status: MessageStatus,
}

/// Durable message storage, called around delivery. Best effort: no
/// retries, and the caller proceeds when a call fails.
#[async_trait]
pub trait MessageRepository: Send + Sync + 'static {
    async fn create_message(&self, message: NewMessage) -> Result<()>;
    async fn update_status(&self, message_id: &str, status: MessageStatus) -> Result<()>;
}

/// Chat membership and identity resolution.
#[async_trait]
pub trait MembershipDirectory: Send + Sync + 'static {
    /// Declared member count of a chat, including the sender. Looked up
    /// fresh on every call, never cached here.
    async fn participant_count(&self, chat_id: &str) -> Result<usize>;

    async fn chat_exists(&self, chat_id: &str) -> Result<bool>;

    async fn identity_exists(&self, identity: &str) -> Result<bool>;
}

/// Repository keeping rows in a process-local map.
#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<String, NewMessage>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted status of a message, if the row exists.
    pub async fn status_of(&self, message_id: &str) -> Option<MessageStatus> {
        self.messages
            .read()
            .await
            .get(message_id)
            .map(|row| row.status)
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create_message(&self, message: NewMessage) -> Result<()> {
        let mut messages = self.messages.write().await;
        messages.insert(message.id.clone(), message);
        Ok(())
    }

    async fn update_status(&self, message_id: &str, status: MessageStatus) -> Result<()> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(message_id) {
            Some(row) => {
                row.status = status;
                Ok(())
            }
            None => Err(NatterError::Repository(format!(
                "unknown message: {}",
                message_id
            ))),
        }
    }
}

/// Directory backed by registered chats and identities.
///
/// The default mode accepts identities and chats it has never heard of,
/// matching a deployment without an account system; `closed()` restricts
/// resolution to what was registered.
pub struct InMemoryDirectory {
    allow_unregistered: bool,
    identities: RwLock<HashSet<String>>,
    chats: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            allow_unregistered: true,
            identities: RwLock::new(HashSet::new()),
            chats: RwLock::new(HashMap::new()),
        }
    }

    /// A directory that only resolves registered identities and chats.
    pub fn closed() -> Self {
        Self {
            allow_unregistered: false,
            ..Self::new()
        }
    }

    pub async fn register_identity(&self, identity: &str) {
        self.identities.write().await.insert(identity.to_string());
    }

    /// Register a chat with its members. Members become known
    /// identities as well.
    pub async fn register_chat(&self, chat_id: &str, members: &[&str]) {
        let mut identities = self.identities.write().await;
        let mut chats = self.chats.write().await;
        let entry = chats.entry(chat_id.to_string()).or_default();
        for member in members {
            entry.insert(member.to_string());
            identities.insert(member.to_string());
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipDirectory for InMemoryDirectory {
    async fn participant_count(&self, chat_id: &str) -> Result<usize> {
        Ok(self
            .chats
            .read()
            .await
            .get(chat_id)
            .map(HashSet::len)
            .unwrap_or(0))
    }

    async fn chat_exists(&self, chat_id: &str) -> Result<bool> {
        if self.allow_unregistered {
            return Ok(true);
        }
        Ok(self.chats.read().await.contains_key(chat_id))
    }

    async fn identity_exists(&self, identity: &str) -> Result<bool> {
        if self.allow_unregistered {
            return Ok(true);
        }
        Ok(self.identities.read().await.contains(identity))
    }
}
