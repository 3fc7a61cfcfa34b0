//! Handshake refusal reasons and their close codes.

use thiserror::Error;

/// Why an upgrade request was refused before attaching to the hub.
///
/// The reason text is sent verbatim in the close frame.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("identity required")]
    IdentityRequired,

    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("unknown chat: {0}")]
    UnknownChat(String),

    #[error("directory error: {0}")]
    Directory(String),
}

impl HandshakeError {
    /// WebSocket close code for this refusal.
    ///
    /// Policy problems close with 1008; a directory outage is the
    /// server's fault and closes with 1011.
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::IdentityRequired
            | HandshakeError::UnknownIdentity(_)
            | HandshakeError::UnknownChat(_) => crate::ws::POLICY_VIOLATION,
            HandshakeError::Directory(_) => crate::ws::INTERNAL_ERROR,
        }
    }
}
