use super::money::Amount;
use super::transaction::{GatewayKind, TransactionStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// An authenticated inbound vendor notification, normalized.
///
/// Lives only long enough to drive one reconciliation; the audit trail keeps
/// the raw payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEvent {
    pub gateway: GatewayKind,
    pub event_type: String,
    /// Vendor id of the payment the event refers to.
    pub payment_id: String,
    pub status: TransactionStatus,
    pub amount: Option<Amount>,
    /// Cumulative refunded amount reported by the vendor, when present.
    pub refunded_total: Option<Decimal>,
    pub gateway_refund_id: Option<String>,
    /// Vendor capture id, for wallet capture events.
    pub capture_id: Option<String>,
    pub signature_verified: bool,
    pub received_at: DateTime<Utc>,
}

/// Response body for an accepted webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
}
