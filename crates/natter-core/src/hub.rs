//! The delivery hub.
//!
//! One explicitly constructed service object wiring the registry, the
//! broadcaster, the receipt ledger, and the history buffer together.
//! Transports hand it connections and decoded frames; persistence and
//! membership stay behind their collaborator traits.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collab::{MembershipDirectory, MessageRepository, NewMessage};
use crate::config::{CoreConfig, ParticipantScope};
use crate::error::Result;
use crate::event::{AckStatus, ClientEvent, MessagePayload, ServerEvent, StatusPayload};
use crate::fanout::Broadcaster;
use crate::history::HistoryBuffer;
use crate::receipts::{MessageOrigin, ReceiptKind, ReceiptLedger};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::status::{aggregate_status, MessageStatus};

fn joined_event(identity: &str) -> ServerEvent {
    ServerEvent::System {
        message: MessagePayload::system(format!("{} joined the chat", identity)),
    }
}

fn left_event(identity: &str) -> ServerEvent {
    ServerEvent::System {
        message: MessagePayload::system(format!("{} left the chat", identity)),
    }
}

/// Orchestrates delivery for every live connection in the process.
pub struct Hub {
    config: CoreConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    ledger: ReceiptLedger,
    history: HistoryBuffer,
    repository: Arc<dyn MessageRepository>,
    directory: Arc<dyn MembershipDirectory>,
}

impl Hub {
    pub fn new(
        config: CoreConfig,
        repository: Arc<dyn MessageRepository>,
        directory: Arc<dyn MembershipDirectory>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let history = HistoryBuffer::new(config.history_cap);
        info!("Delivery hub ready (scope: {:?})", config.scope);
        Self {
            config,
            registry,
            broadcaster,
            ledger: ReceiptLedger::new(),
            history,
            repository,
            directory,
        }
    }

    /// The registry, for transports and tests that inspect presence.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The membership collaborator, for transports validating handshakes.
    pub fn directory(&self) -> Arc<dyn MembershipDirectory> {
        self.directory.clone()
    }

    /// Register a connection and run the connect choreography: presence
    /// announcement on a first connection, history snapshot, then the
    /// seen-ack replay for messages the identity owns.
    ///
    /// An `Err` means the fresh connection is already unreachable; the
    /// transport should tear it down with [`Hub::detach`].
    pub async fn attach(&self, identity: &str, connection: Arc<dyn Connection>) -> Result<()> {
        let id = connection.id();
        let first = self.registry.connect(identity, connection.clone()).await;
        info!(
            "{} attached on {}{}",
            identity,
            id,
            if first { " (first connection)" } else { "" }
        );

        if first {
            self.broadcast_with_presence(&joined_event(identity), None, Some(id))
                .await;
        }

        let messages = self.history.snapshot().await;
        connection.send(&ServerEvent::History { messages }).await?;

        self.replay_seen_acks(identity, connection.as_ref()).await
    }

    /// Remove a connection and announce the departure when it was the
    /// identity's last one.
    pub async fn detach(&self, identity: &str, connection: ConnectionId) {
        let last = self.registry.disconnect(identity, Some(connection)).await;
        info!(
            "{} detached from {}{}",
            identity,
            connection,
            if last { " (last connection)" } else { "" }
        );
        if last {
            self.broadcast_with_presence(&left_event(identity), Some(identity), None)
                .await;
        }
    }

    /// Decode and dispatch one raw text frame from a connection.
    ///
    /// Protocol problems are answered with an `error` event on the
    /// origin and the connection stays open. An `Err` from here means
    /// the origin is unreachable or misbehaving beyond protocol level;
    /// the transport should drop it.
    pub async fn handle_frame(
        &self,
        chat_id: &str,
        identity: &str,
        connection: &Arc<dyn Connection>,
        text: &str,
    ) -> Result<()> {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(chat_id, identity, connection, event).await,
            Err(e) => {
                debug!("Malformed frame from {}: {}", identity, e);
                self.send_error(connection, "malformed event").await
            }
        }
    }

    /// Dispatch one decoded client event.
    pub async fn handle_event(
        &self,
        chat_id: &str,
        identity: &str,
        connection: &Arc<dyn Connection>,
        event: ClientEvent,
    ) -> Result<()> {
        match event {
            ClientEvent::Message { id, content } => {
                self.handle_message(chat_id, identity, connection, id, content)
                    .await
            }
            ClientEvent::Seen { message_id } => self.handle_seen(identity, &message_id).await,
            ClientEvent::Ack { message_id, status } => match status {
                ReceiptKind::Seen => self.handle_seen(identity, &message_id).await,
                ReceiptKind::Delivered => self.handle_delivered(identity, &message_id).await,
            },
            ClientEvent::Typing { payload } => {
                self.broadcast_with_presence(
                    &ServerEvent::Typing { payload },
                    None,
                    Some(connection.id()),
                )
                .await;
                Ok(())
            }
            ClientEvent::Join { payload } => {
                self.broadcast_with_presence(
                    &ServerEvent::Join { payload },
                    None,
                    Some(connection.id()),
                )
                .await;
                Ok(())
            }
            ClientEvent::Unknown => self.send_error(connection, "unknown event").await,
        }
    }

    /// Receipt counts for a message plus the participant total under the
    /// configured scope: `(delivered, seen, total)`.
    pub async fn counts(&self, message_id: &str, chat_id: &str) -> (usize, usize, usize) {
        let (delivered, seen) = self.ledger.receipt_counts(message_id).await;
        let total = match self.ledger.origin_of(message_id).await {
            Some(origin) => self.participant_total(chat_id, &origin.owner).await,
            None => 0,
        };
        (delivered, seen, total)
    }

    async fn handle_message(
        &self,
        chat_id: &str,
        identity: &str,
        connection: &Arc<dyn Connection>,
        id: Option<String>,
        content: String,
    ) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return self.send_error(connection, "empty content").await;
        }

        let message_id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let message = MessagePayload::new(message_id.clone(), identity, content);

        self.ledger
            .record_ownership(&message_id, identity, chat_id)
            .await;

        let row = NewMessage {
            id: message_id.clone(),
            chat_id: chat_id.to_string(),
            sender_id: identity.to_string(),
            content: content.to_string(),
            status: MessageStatus::Sent,
        };
        if let Err(e) = self.repository.create_message(row).await {
            warn!("Persist of message {} failed: {}", message_id, e);
        }

        self.history.push(message.clone()).await;

        // Received goes to the sender before the fanout, delivered after.
        self.send_ack(identity, &message_id, AckStatus::Received, None)
            .await;

        self.broadcast_with_presence(
            &ServerEvent::Message { message },
            None,
            Some(connection.id()),
        )
        .await;

        self.send_ack(identity, &message_id, AckStatus::Delivered, None)
            .await;

        let total = self.participant_total(chat_id, identity).await;
        self.broadcast_status(&message_id, 0, 0, total, aggregate_status(0, 0, total))
            .await;

        debug!("Message {} from {} fanned out", message_id, identity);
        Ok(())
    }

    async fn handle_seen(&self, identity: &str, message_id: &str) -> Result<()> {
        let Some(origin) = self.ledger.origin_of(message_id).await else {
            debug!("Seen for untracked message {} ignored", message_id);
            return Ok(());
        };
        if origin.owner == identity {
            return Ok(());
        }
        if !self
            .ledger
            .record_receipt(message_id, identity, ReceiptKind::Seen)
            .await
        {
            return Ok(());
        }

        self.send_ack(
            &origin.owner,
            message_id,
            AckStatus::Seen,
            Some(identity.to_string()),
        )
        .await;
        self.refresh_status(message_id, &origin).await;
        Ok(())
    }

    async fn handle_delivered(&self, identity: &str, message_id: &str) -> Result<()> {
        if !self
            .ledger
            .record_receipt(message_id, identity, ReceiptKind::Delivered)
            .await
        {
            return Ok(());
        }
        if let Some(origin) = self.ledger.origin_of(message_id).await {
            self.refresh_status(message_id, &origin).await;
        }
        Ok(())
    }

    /// Recompute a message's status, persist it best effort, and fan the
    /// fresh counts out to everyone.
    async fn refresh_status(&self, message_id: &str, origin: &MessageOrigin) {
        let (delivered, seen) = self.ledger.receipt_counts(message_id).await;
        let total = self.participant_total(&origin.chat_id, &origin.owner).await;
        let status = aggregate_status(delivered, seen, total);

        if let Err(e) = self.repository.update_status(message_id, status).await {
            warn!("Status persist for {} failed: {}", message_id, e);
        }

        self.broadcast_status(message_id, delivered, seen, total, status)
            .await;
    }

    async fn broadcast_status(
        &self,
        message_id: &str,
        delivered: usize,
        seen: usize,
        total: usize,
        status: MessageStatus,
    ) {
        let payload = StatusPayload {
            message_id: message_id.to_string(),
            delivered_count: delivered,
            seen_count: seen,
            total_participants: total,
            status,
        };
        self.broadcast_with_presence(&ServerEvent::Status { payload }, None, None)
            .await;
    }

    /// Participant universe for a sender under the configured scope.
    async fn participant_total(&self, chat_id: &str, owner: &str) -> usize {
        match self.config.scope {
            ParticipantScope::Global => self.registry.other_identity_count(owner).await,
            ParticipantScope::PerChat => match self.directory.participant_count(chat_id).await {
                Ok(count) => count.saturating_sub(1),
                Err(e) => {
                    warn!("Participant count for {} failed: {}", chat_id, e);
                    0
                }
            },
        }
    }

    /// Re-send seen acks for messages the identity owns, on its fresh
    /// connection. Replay never recomputes status and never reaches
    /// other parties.
    async fn replay_seen_acks(&self, identity: &str, connection: &dyn Connection) -> Result<()> {
        let owned = self.ledger.seen_receipts_for_owner(identity).await;
        for (message_id, seen_by) in owned {
            for by in seen_by {
                let ack = ServerEvent::Ack {
                    message_id: message_id.clone(),
                    status: AckStatus::Seen,
                    by: Some(by),
                };
                connection.send(&ack).await?;
            }
        }
        Ok(())
    }

    async fn send_ack(
        &self,
        identity: &str,
        message_id: &str,
        status: AckStatus,
        by: Option<String>,
    ) {
        let ack = ServerEvent::Ack {
            message_id: message_id.to_string(),
            status,
            by,
        };
        if self.broadcaster.send_to(identity, &ack).await {
            info!("{} went offline during ack delivery", identity);
            self.broadcast_with_presence(&left_event(identity), Some(identity), None)
                .await;
        }
    }

    async fn send_error(&self, connection: &Arc<dyn Connection>, message: &str) -> Result<()> {
        connection
            .send(&ServerEvent::Error {
                message: message.to_string(),
            })
            .await
    }

    /// Broadcast plus departure announcements for identities whose last
    /// connection was pruned during the sweep.
    async fn broadcast_with_presence(
        &self,
        event: &ServerEvent,
        skip_identity: Option<&str>,
        skip_connection: Option<ConnectionId>,
    ) {
        let mut departed = self
            .broadcaster
            .broadcast(event, skip_identity, skip_connection)
            .await;
        while let Some(identity) = departed.pop() {
            info!("{} went offline during fanout", identity);
            let more = self
                .broadcaster
                .broadcast(&left_event(&identity), Some(&identity), None)
                .await;
            departed.extend(more);
        }
    }
}
