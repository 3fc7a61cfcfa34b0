//! Aggregate message status.

use serde::{Deserialize, Serialize};

/// Delivery status of a message as visible to its sender.
///
/// `Pending` is the client-side optimistic state for a message that has
/// not reached the server yet; the aggregation below never produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    DeliveredPartial,
    DeliveredAll,
    SeenPartial,
    SeenAll,
}

/// Compute the aggregate status of a message from its receipt counts.
///
/// `total` is the number of participants other than the sender. Seen
/// receipts take precedence over delivered receipts at every step, so a
/// message can report `SeenPartial` while deliveries are still missing.
/// A universe of zero participants always reports `Sent`, whatever the
/// counts say.
pub fn aggregate_status(delivered: usize, seen: usize, total: usize) -> MessageStatus {
    if total == 0 {
        return MessageStatus::Sent;
    }
    if seen >= total {
        return MessageStatus::SeenAll;
    }
    if seen > 0 {
        return MessageStatus::SeenPartial;
    }
    if delivered >= total {
        return MessageStatus::DeliveredAll;
    }
    if delivered > 0 {
        return MessageStatus::DeliveredPartial;
    }
    MessageStatus::Sent
}
