//! Delivery core configuration.

use serde::{Deserialize, Serialize};

/// How the participant universe for a message is determined when
/// aggregating its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantScope {
    /// Every currently connected identity except the sender counts.
    Global,
    /// Declared chat membership, minus the sender, counts. Looked up
    /// through the membership directory on every recomputation.
    PerChat,
}

impl Default for ParticipantScope {
    fn default() -> Self {
        ParticipantScope::Global
    }
}

impl ParticipantScope {
    /// Parse a scope name as it appears in configuration.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Some(ParticipantScope::Global),
            "per_chat" | "per-chat" | "chat" => Some(ParticipantScope::PerChat),
            _ => None,
        }
    }
}

/// Tunables for the delivery core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Participant universe policy for status aggregation.
    pub scope: ParticipantScope,
    /// Maximum messages retained for reconnect history. `None` keeps
    /// everything for the life of the process.
    pub history_cap: Option<usize>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            scope: ParticipantScope::default(),
            history_cap: None,
        }
    }
}

impl CoreConfig {
    /// Replace the participant scope.
    pub fn with_scope(mut self, scope: ParticipantScope) -> Self {
        self.scope = scope;
        self
    }

    /// Cap the reconnect history buffer.
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = Some(cap);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parse() {
        assert_eq!(
            ParticipantScope::parse("global"),
            Some(ParticipantScope::Global)
        );
        assert_eq!(
            ParticipantScope::parse("per_chat"),
            Some(ParticipantScope::PerChat)
        );
        assert_eq!(
            ParticipantScope::parse("PER-CHAT"),
            Some(ParticipantScope::PerChat)
        );
        assert_eq!(ParticipantScope::parse("room"), None);
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.scope, ParticipantScope::Global);
        assert!(config.history_cap.is_none());
    }

    #[test]
    fn test_builder_style() {
        let config = CoreConfig::default()
            .with_scope(ParticipantScope::PerChat)
            .with_history_cap(100);
        assert_eq!(config.scope, ParticipantScope::PerChat);
        assert_eq!(config.history_cap, Some(100));
    }
}
