use crate::application::broker::PaymentBroker;
use crate::domain::intent::{CaptureAction, CaptureParams, PaymentIntent, RefundRequest};
use crate::domain::money::Amount;
use crate::domain::transaction::{GatewayKind, RefundId};
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::io::BufRead;
use std::sync::Arc;
use tracing::info;

/// One line of a JSON-lines command batch.
///
/// Payment ids written `#N` refer to the N-th payment created earlier in the
/// same batch, refund ids `#N` to the N-th refund.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchCommand {
    Create(PaymentIntent),
    Verify {
        #[serde(default)]
        gateway: Option<String>,
        payment_id: String,
    },
    Capture {
        #[serde(default)]
        gateway: Option<String>,
        payment_id: String,
        #[serde(default)]
        action: Option<CaptureAction>,
        #[serde(default, alias = "confirmed_by")]
        actor: Option<String>,
        #[serde(default)]
        amount_received: Option<Amount>,
        #[serde(default)]
        notes: Option<String>,
    },
    Refund {
        #[serde(default)]
        gateway: Option<String>,
        payment_id: String,
        #[serde(default)]
        amount: Option<Amount>,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        actor: Option<String>,
    },
    CompleteRefund {
        refund_id: String,
        actor: String,
    },
}

/// Reads commands from a JSON-lines source, skipping blank lines.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily yields `(line number, command)` pairs.
    pub fn commands(self) -> impl Iterator<Item = (usize, Result<BatchCommand>)> {
        self.source
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line))
            .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
            .map(|(number, line)| {
                let parsed = line
                    .map_err(PaymentError::from)
                    .and_then(|text| serde_json::from_str(&text).map_err(PaymentError::from));
                (number, parsed)
            })
    }
}

/// Executes batch commands against a broker, remembering what it created.
pub struct BatchRunner {
    broker: Arc<PaymentBroker>,
    payments: Vec<(GatewayKind, String)>,
    refunds: Vec<RefundId>,
}

impl BatchRunner {
    pub fn new(broker: Arc<PaymentBroker>) -> Self {
        Self {
            broker,
            payments: Vec::new(),
            refunds: Vec::new(),
        }
    }

    fn batch_index(reference: &str) -> Option<Result<usize>> {
        let index = reference.strip_prefix('#')?;
        Some(
            index
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(|n| n - 1)
                .ok_or_else(|| PaymentError::Validation(format!("Invalid batch reference {reference}"))),
        )
    }

    fn resolve_payment(&self, gateway: Option<&str>, payment_id: &str) -> Result<(GatewayKind, String)> {
        if let Some(index) = Self::batch_index(payment_id) {
            return self.payments.get(index?).cloned().ok_or_else(|| {
                PaymentError::NotFound(format!("no payment {payment_id} in this batch"))
            });
        }
        let gateway = gateway.ok_or_else(|| {
            PaymentError::Validation(format!("gateway is required for payment {payment_id}"))
        })?;
        Ok((gateway.parse()?, payment_id.to_string()))
    }

    fn resolve_refund(&self, refund_id: &str) -> Result<RefundId> {
        if let Some(index) = Self::batch_index(refund_id) {
            return self.refunds.get(index?).copied().ok_or_else(|| {
                PaymentError::NotFound(format!("no refund {refund_id} in this batch"))
            });
        }
        refund_id
            .trim()
            .parse()
            .map(RefundId)
            .map_err(|_| PaymentError::Validation(format!("Invalid refund id {refund_id}")))
    }

    pub async fn execute(&mut self, command: BatchCommand) -> Result<()> {
        match command {
            BatchCommand::Create(intent) => {
                let created = self.broker.create(&intent).await?;
                let tx = created.transaction;
                info!(
                    batch_ref = self.payments.len() + 1,
                    gateway = %tx.gateway,
                    payment_id = %tx.gateway_transaction_id,
                    "payment created"
                );
                self.payments.push((tx.gateway, tx.gateway_transaction_id));
            }
            BatchCommand::Verify {
                gateway,
                payment_id,
            } => {
                let (kind, id) = self.resolve_payment(gateway.as_deref(), &payment_id)?;
                let snapshot = self.broker.verify(kind, &id).await?;
                info!(gateway = %kind, payment_id = %id, status = %snapshot.status, "payment verified");
            }
            BatchCommand::Capture {
                gateway,
                payment_id,
                action,
                actor,
                amount_received,
                notes,
            } => {
                let (kind, id) = self.resolve_payment(gateway.as_deref(), &payment_id)?;
                let params = CaptureParams {
                    action,
                    actor,
                    amount_received,
                    notes,
                };
                let status = self.broker.capture(kind, &id, &params).await?;
                info!(gateway = %kind, payment_id = %id, %status, "payment captured");
            }
            BatchCommand::Refund {
                gateway,
                payment_id,
                amount,
                reason,
                actor,
            } => {
                let (kind, id) = self.resolve_payment(gateway.as_deref(), &payment_id)?;
                let request = RefundRequest {
                    amount,
                    reason,
                    actor,
                };
                let refund = self.broker.refund(kind, &id, &request).await?;
                info!(
                    batch_ref = self.refunds.len() + 1,
                    refund_id = %refund.id,
                    status = %refund.status,
                    "refund requested"
                );
                self.refunds.push(refund.id);
            }
            BatchCommand::CompleteRefund { refund_id, actor } => {
                let id = self.resolve_refund(&refund_id)?;
                self.broker.complete_manual_refund(id, &actor).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::ReconciliationEngine;
    use crate::domain::transaction::TransactionStatus;
    use crate::infrastructure::in_memory::{
        InMemoryRefundStore, InMemoryTransactionStore, MemoryAuditLog,
    };
    use rust_decimal_macros::dec;

    fn runner() -> BatchRunner {
        let engine = ReconciliationEngine::new(
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(InMemoryRefundStore::new()),
            Arc::new(MemoryAuditLog::new()),
        );
        BatchRunner::new(Arc::new(PaymentBroker::new(Arc::new(engine))))
    }

    #[test]
    fn test_reader_parses_commands_and_skips_blank_lines() {
        let data = r##"{"op":"create","gateway":"manual","amount":500,"currency":"PHP","customer_email":"a@example.com"}

{"op":"capture","payment_id":"#1","action":"confirm","confirmed_by":"clerk"}
{"op":"explode"}"##;
        let commands: Vec<_> = CommandReader::new(data.as_bytes()).commands().collect();
        assert_eq!(commands.len(), 3);
        assert!(matches!(&commands[0], (1, Ok(BatchCommand::Create(_)))));
        match &commands[1] {
            (3, Ok(BatchCommand::Capture { action, actor, .. })) => {
                assert_eq!(*action, Some(CaptureAction::Confirm));
                assert_eq!(actor.as_deref(), Some("clerk"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&commands[2], (4, Err(_))));
    }

    #[tokio::test]
    async fn test_batch_references_resolve() {
        let mut runner = runner();
        let lines = [
            r##"{"op":"create","gateway":"manual","amount":"500.00","currency":"PHP","customer_email":"a@example.com"}"##,
            r##"{"op":"capture","payment_id":"#1","action":"confirm","actor":"clerk"}"##,
            r##"{"op":"refund","payment_id":"#1","amount":"200.00","reason":"partial","actor":"lead"}"##,
            r##"{"op":"complete_refund","refund_id":"#1","actor":"cashier"}"##,
        ];
        for line in lines {
            let command: BatchCommand = serde_json::from_str(line).unwrap();
            runner.execute(command).await.unwrap();
        }

        let txs = runner.broker.engine().all_transactions().await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Completed);
        assert_eq!(txs[0].refund_amount, Some(dec!(200.00)));
    }

    #[tokio::test]
    async fn test_unknown_references_fail() {
        let mut runner = runner();
        let verify: BatchCommand =
            serde_json::from_str(r##"{"op":"verify","payment_id":"#3"}"##).unwrap();
        assert!(matches!(
            runner.execute(verify).await,
            Err(PaymentError::NotFound(_))
        ));
        let no_gateway: BatchCommand =
            serde_json::from_str(r##"{"op":"verify","payment_id":"CASH-1"}"##).unwrap();
        assert!(matches!(
            runner.execute(no_gateway).await,
            Err(PaymentError::Validation(_))
        ));
    }
}
