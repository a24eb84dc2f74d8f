use super::lifecycle::TransitionSource;
use super::transaction::{GatewayKind, RefundId, TransactionId, TransactionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    TransactionCreated,
    StatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
        source: TransitionSource,
    },
    IllegalTransition {
        from: TransactionStatus,
        to: TransactionStatus,
        source: TransitionSource,
    },
    AmountMismatch {
        source: TransitionSource,
    },
    RefundRequested {
        refund_id: RefundId,
    },
    RefundCompleted {
        refund_id: RefundId,
    },
    RefundFailed {
        refund_id: RefundId,
    },
    GatewayError,
    WebhookReceived {
        event_type: String,
    },
    WebhookRejected {
        reason: String,
    },
    ApiRequest {
        endpoint: String,
        status_code: u16,
        duration_ms: u64,
    },
}

/// One entry of the append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub gateway: Option<GatewayKind>,
    pub transaction_id: Option<TransactionId>,
    pub detail: serde_json::Value,
    pub source_ip: Option<IpAddr>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind) -> Self {
        Self {
            kind,
            gateway: None,
            transaction_id: None,
            detail: serde_json::Value::Null,
            source_ip: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn gateway(mut self, gateway: GatewayKind) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn transaction(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn source_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.source_ip = ip;
        self
    }

    pub fn is_transition(&self) -> bool {
        matches!(self.kind, AuditKind::StatusTransition { .. })
    }
}
