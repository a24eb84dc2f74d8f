use crate::domain::audit::AuditEvent;
use crate::domain::ports::AuditSink;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Emits every audit event as a structured `tracing` event on the
/// `paybroker::audit` target, leaving storage to the subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        let kind = serde_json::to_string(&event.kind)?;
        info!(
            target: "paybroker::audit",
            kind = %kind,
            gateway = event.gateway.map(|g| g.as_str()),
            transaction_id = event.transaction_id.map(|id| id.0),
            source_ip = ?event.source_ip,
            recorded_at = %event.recorded_at.to_rfc3339(),
            detail = %event.detail,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditKind;
    use crate::domain::transaction::{GatewayKind, TransactionId};

    #[tokio::test]
    async fn test_records_without_subscriber() {
        let sink = TracingAuditSink;
        let event = AuditEvent::new(AuditKind::TransactionCreated)
            .gateway(GatewayKind::Manual)
            .transaction(TransactionId(1));
        assert!(sink.record(event).await.is_ok());
    }
}
