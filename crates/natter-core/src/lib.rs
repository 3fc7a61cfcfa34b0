//! Natter delivery core.
//!
//! In-memory real-time delivery for the chat server: a connection
//! registry, best-effort fanout, delivered/seen receipts, and aggregate
//! message status, with persistence and membership behind collaborator
//! traits.

pub mod collab;
pub mod config;
pub mod error;
pub mod event;
pub mod fanout;
pub mod history;
pub mod hub;
pub mod receipts;
pub mod registry;
pub mod status;

pub use collab::{
    InMemoryDirectory, InMemoryMessageRepository, MembershipDirectory, MessageRepository,
    NewMessage,
};
pub use config::{CoreConfig, ParticipantScope};
pub use error::{NatterError, Result};
pub use event::{
    AckStatus, ClientEvent, MessagePayload, ServerEvent, StatusPayload, SYSTEM_IDENTITY,
};
pub use fanout::Broadcaster;
pub use history::HistoryBuffer;
pub use hub::Hub;
pub use receipts::{MessageOrigin, ReceiptKind, ReceiptLedger};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use status::{aggregate_status, MessageStatus};
