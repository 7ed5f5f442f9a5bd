use serde::{Deserialize, Serialize};

/// A received webhook, recorded once and never mutated.
///
/// The table holding these rows doubles as the idempotency ledger: its
/// primary key is the sender-assigned event id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub external_event_id: String,
    pub event_type: String,
    pub received_at: i64,
    pub correlation_id: String,
    pub raw_payload: String,
}
