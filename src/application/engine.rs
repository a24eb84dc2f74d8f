use crate::domain::audit::{AuditEvent, AuditKind};
use crate::domain::lifecycle::{self, EdgeCheck, TransitionSource};
use crate::domain::money::{Amount, to_minor_precision};
use crate::domain::ports::{AuditSinkRef, RefundStoreRef, TransactionStoreRef};
use crate::domain::transaction::{
    GatewayKind, NewRefund, NewTransaction, Refund, RefundId, RefundPatch, RefundReservation,
    RefundStatus, Transaction, TransactionId, TransactionPatch, TransactionStatus, completed_total,
};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A status reported by one reconciliation channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub status: TransactionStatus,
    /// Amount the vendor or staff reports; guards the move to `completed`.
    pub amount: Option<Decimal>,
    pub vendor_response: Option<serde_json::Value>,
    pub metadata: BTreeMap<String, String>,
}

impl Observation {
    pub fn new(status: TransactionStatus) -> Self {
        Self {
            status,
            amount: None,
            vendor_response: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn amount(mut self, amount: Decimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn vendor_response(mut self, response: serde_json::Value) -> Self {
        self.vendor_response = Some(response);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    /// Nothing was written: the record already holds this status, or a
    /// concurrent transition superseded the request.
    Unchanged(TransactionStatus),
}

impl TransitionOutcome {
    pub fn status(&self) -> TransactionStatus {
        match self {
            TransitionOutcome::Applied { to, .. } => *to,
            TransitionOutcome::Unchanged(status) => *status,
        }
    }
}

/// The state machine driver.
///
/// Every status change, whatever channel reported it, goes through
/// [`ReconciliationEngine::apply_transition`]. Each write is a compare-and-swap
/// on the record's current status, so concurrent callers never overwrite each
/// other; a caller that loses a race re-reads and either finds its request
/// already satisfied or gets `IllegalTransition`.
pub struct ReconciliationEngine {
    transactions: TransactionStoreRef,
    refunds: RefundStoreRef,
    audit: AuditSinkRef,
}

impl ReconciliationEngine {
    /// Creates a new engine.
    ///
    /// # Arguments
    ///
    /// * `transactions` - The store for transaction records.
    /// * `refunds` - The store for refund records.
    /// * `audit` - The sink every state change is reported to.
    pub fn new(
        transactions: TransactionStoreRef,
        refunds: RefundStoreRef,
        audit: AuditSinkRef,
    ) -> Self {
        Self {
            transactions,
            refunds,
            audit,
        }
    }

    /// Persists a freshly created payment in `pending`.
    pub async fn open_transaction(&self, new: NewTransaction) -> Result<Transaction> {
        let tx = self.transactions.insert(new).await?;
        info!(
            transaction_id = %tx.id,
            gateway = %tx.gateway,
            reference = %tx.gateway_transaction_id,
            amount = %tx.amount,
            currency = %tx.currency,
            "transaction created"
        );
        self.audit(
            AuditEvent::new(AuditKind::TransactionCreated)
                .gateway(tx.gateway)
                .transaction(tx.id)
                .detail(json!({
                    "transaction_uuid": tx.transaction_uuid,
                    "reference": tx.gateway_transaction_id,
                    "amount": tx.amount,
                    "currency": tx.currency,
                })),
        )
        .await;
        Ok(tx)
    }

    /// The single mutation point for transaction status.
    pub async fn apply_transition(
        &self,
        id: TransactionId,
        observation: Observation,
        source: TransitionSource,
    ) -> Result<TransitionOutcome> {
        let requested = observation.status;
        let mut current = self.transaction(id).await?;

        loop {
            match lifecycle::check(current.status, requested) {
                EdgeCheck::Unchanged => {
                    debug!(transaction_id = %id, status = %requested, %source, "status already recorded");
                    self.backfill_metadata(id, &observation.metadata).await?;
                    return Ok(TransitionOutcome::Unchanged(current.status));
                }
                EdgeCheck::Illegal => {
                    warn!(
                        transaction_id = %id,
                        from = %current.status,
                        to = %requested,
                        %source,
                        "illegal status transition rejected"
                    );
                    self.audit(
                        AuditEvent::new(AuditKind::IllegalTransition {
                            from: current.status,
                            to: requested,
                            source,
                        })
                        .gateway(current.gateway)
                        .transaction(id),
                    )
                    .await;
                    return Err(PaymentError::IllegalTransition {
                        from: current.status,
                        to: requested,
                    });
                }
                EdgeCheck::Allowed => {}
            }

            let patch = self.guarded_patch(&current, &observation, source).await?;
            let from = current.status;
            if self.transactions.update_if_status(id, from, patch).await? {
                info!(transaction_id = %id, %from, to = %requested, %source, "status transition");
                self.audit(
                    AuditEvent::new(AuditKind::StatusTransition {
                        from,
                        to: requested,
                        source,
                    })
                    .gateway(current.gateway)
                    .transaction(id)
                    .detail(observation.vendor_response.clone().unwrap_or_default()),
                )
                .await;
                return Ok(TransitionOutcome::Applied {
                    from,
                    to: requested,
                });
            }

            current = self.transaction(id).await?;
            if lifecycle::supersedes(current.status, requested) {
                debug!(
                    transaction_id = %id,
                    status = %current.status,
                    requested = %requested,
                    %source,
                    "lost transition race, request superseded"
                );
                self.backfill_metadata(id, &observation.metadata).await?;
                return Ok(TransitionOutcome::Unchanged(current.status));
            }
        }
    }

    /// Records metadata keys the transaction does not carry yet, leaving the
    /// status alone. Keys already present are never overwritten.
    pub async fn backfill_metadata(
        &self,
        id: TransactionId,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Transaction> {
        loop {
            let tx = self.transaction(id).await?;
            let missing: BTreeMap<String, String> = metadata
                .iter()
                .filter(|(key, _)| !tx.metadata.contains_key(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            if missing.is_empty() {
                return Ok(tx);
            }

            let mut patch = TransactionPatch::status(tx.status);
            patch.metadata = missing;
            if self.transactions.update_if_status(id, tx.status, patch).await? {
                debug!(transaction_id = %id, status = %tx.status, "metadata backfilled");
                return self.transaction(id).await;
            }
        }
    }

    /// Builds the patch for an allowed edge after checking its guard.
    async fn guarded_patch(
        &self,
        current: &Transaction,
        observation: &Observation,
        source: TransitionSource,
    ) -> Result<TransactionPatch> {
        let mut patch = TransactionPatch::status(observation.status);
        patch.gateway_response = observation.vendor_response.clone();
        patch.metadata = observation.metadata.clone();

        match observation.status {
            TransactionStatus::Completed => {
                if let Some(observed) = observation.amount {
                    let observed = to_minor_precision(observed);
                    if observed != current.amount.value() {
                        warn!(
                            transaction_id = %current.id,
                            expected = %current.amount,
                            %observed,
                            %source,
                            "reported amount does not match recorded amount"
                        );
                        self.audit(
                            AuditEvent::new(AuditKind::AmountMismatch { source })
                                .gateway(current.gateway)
                                .transaction(current.id)
                                .detail(json!({
                                    "expected": current.amount,
                                    "observed": observed,
                                })),
                        )
                        .await;
                        return Err(PaymentError::AmountMismatch {
                            expected: current.amount.value(),
                            observed,
                        });
                    }
                }
                patch.processed_at = Some(Utc::now());
            }
            TransactionStatus::Failed | TransactionStatus::Cancelled => {
                patch.processed_at = Some(Utc::now());
            }
            TransactionStatus::Refunded => {
                let refunds = self.refunds.for_transaction(current.id).await?;
                let total = completed_total(&refunds);
                if total != current.amount.value() {
                    return Err(PaymentError::Validation(format!(
                        "Completed refunds {} do not settle transaction amount {}",
                        to_minor_precision(total),
                        current.amount
                    )));
                }
                patch.refund_amount = Some(to_minor_precision(total));
            }
            TransactionStatus::Pending | TransactionStatus::Processing => {}
        }
        Ok(patch)
    }

    /// Reserves a `pending` refund against a completed transaction.
    ///
    /// `amount` defaults to the full transaction amount.
    pub async fn open_refund(
        &self,
        id: TransactionId,
        amount: Option<Amount>,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<Refund> {
        let tx = self.transaction(id).await?;
        if tx.status != TransactionStatus::Completed {
            return Err(PaymentError::Validation(format!(
                "Only completed transactions can be refunded (transaction {} is {})",
                tx.transaction_uuid, tx.status
            )));
        }
        let amount = amount.unwrap_or(tx.amount);
        self.reserve_refund(&tx, amount, reason, actor).await
    }

    async fn reserve_refund(
        &self,
        tx: &Transaction,
        amount: Amount,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<Refund> {
        let new = NewRefund {
            transaction_id: tx.id,
            refund_uuid: format!("refund_{}", uuid::Uuid::new_v4().simple()),
            amount,
            currency: tx.currency.clone(),
            reason: reason.to_string(),
            requested_by: actor.map(str::to_string),
        };

        match self.refunds.reserve(new, tx.amount).await? {
            RefundReservation::Reserved(refund) => {
                info!(
                    transaction_id = %tx.id,
                    refund_id = %refund.id,
                    amount = %refund.amount,
                    "refund reserved"
                );
                self.audit(
                    AuditEvent::new(AuditKind::RefundRequested {
                        refund_id: refund.id,
                    })
                    .gateway(tx.gateway)
                    .transaction(tx.id)
                    .detail(json!({
                        "amount": refund.amount,
                        "reason": refund.reason,
                        "requested_by": refund.requested_by,
                    })),
                )
                .await;
                Ok(refund)
            }
            RefundReservation::InProgress => {
                Err(PaymentError::RefundInProgress(tx.transaction_uuid.clone()))
            }
            RefundReservation::ExceedsBalance { available } => {
                Err(PaymentError::RefundExceedsBalance {
                    requested: amount.value(),
                    available: to_minor_precision(available),
                })
            }
        }
    }

    /// Attaches the vendor's refund id to a refund that is still pending.
    pub async fn acknowledge_refund(
        &self,
        refund_id: RefundId,
        gateway_refund_id: &str,
    ) -> Result<Refund> {
        let mut patch = RefundPatch::status(RefundStatus::Pending);
        patch.gateway_refund_id = Some(gateway_refund_id.to_string());
        if !self
            .refunds
            .update_if_status(refund_id, RefundStatus::Pending, patch)
            .await?
        {
            debug!(%refund_id, "refund no longer pending, vendor id not attached");
        }
        self.refund(refund_id).await
    }

    /// Marks a pending refund completed and updates the owning transaction.
    ///
    /// Settling an already completed refund is a no-op. When completed refunds
    /// reach the transaction amount the transaction moves to `refunded`.
    pub async fn settle_refund(
        &self,
        refund_id: RefundId,
        gateway_refund_id: Option<String>,
        actor: Option<&str>,
    ) -> Result<Refund> {
        let mut patch = RefundPatch::status(RefundStatus::Completed);
        patch.gateway_refund_id = gateway_refund_id;
        patch.processed_by = actor.map(str::to_string);
        patch.processed_at = Some(Utc::now());

        let applied = self
            .refunds
            .update_if_status(refund_id, RefundStatus::Pending, patch)
            .await?;
        let refund = self.refund(refund_id).await?;
        if !applied {
            return match refund.status {
                RefundStatus::Completed => Ok(refund),
                status => Err(PaymentError::Validation(format!(
                    "Refund {} is {status} and cannot be completed",
                    refund.refund_uuid
                ))),
            };
        }

        let tx = self.transaction(refund.transaction_id).await?;
        info!(
            transaction_id = %tx.id,
            %refund_id,
            amount = %refund.amount,
            "refund completed"
        );
        self.audit(
            AuditEvent::new(AuditKind::RefundCompleted { refund_id })
                .gateway(tx.gateway)
                .transaction(tx.id)
                .detail(json!({
                    "amount": refund.amount,
                    "gateway_refund_id": refund.gateway_refund_id,
                    "processed_by": refund.processed_by,
                })),
        )
        .await;

        self.sync_refund_total(tx.id).await?;
        Ok(refund)
    }

    /// Records a vendor rejection of a reserved refund.
    pub async fn abandon_refund(&self, refund_id: RefundId, reason: &str) -> Result<Refund> {
        let mut patch = RefundPatch::status(RefundStatus::Failed);
        patch.failure_reason = Some(reason.to_string());
        patch.processed_at = Some(Utc::now());

        if self
            .refunds
            .update_if_status(refund_id, RefundStatus::Pending, patch)
            .await?
        {
            let refund = self.refund(refund_id).await?;
            warn!(%refund_id, transaction_id = %refund.transaction_id, reason, "refund failed");
            self.audit(
                AuditEvent::new(AuditKind::RefundFailed { refund_id })
                    .transaction(refund.transaction_id)
                    .detail(json!({ "reason": reason })),
            )
            .await;
            return Ok(refund);
        }
        self.refund(refund_id).await
    }

    /// Brings local refund records in line with a vendor-reported cumulative
    /// refunded total.
    ///
    /// A pending local refund the report covers is settled, preferring the one
    /// the vendor refund id was acknowledged under; any remaining
    /// unaccounted amount is recorded as a completed refund. Replaying the same
    /// report changes nothing.
    pub async fn reconcile_vendor_refund(
        &self,
        id: TransactionId,
        refunded_total: Decimal,
        gateway_refund_id: Option<String>,
    ) -> Result<Transaction> {
        let tx = self.transaction(id).await?;
        if tx.status == TransactionStatus::Refunded {
            return Ok(tx);
        }
        if tx.status != TransactionStatus::Completed {
            return Err(PaymentError::IllegalTransition {
                from: tx.status,
                to: TransactionStatus::Refunded,
            });
        }
        let reported = to_minor_precision(refunded_total);

        let refunds = self.refunds.for_transaction(id).await?;
        let known = match gateway_refund_id.as_deref() {
            Some(gateway_id) => self
                .refunds
                .find_by_gateway_id(gateway_id)
                .await?
                .filter(|r| r.transaction_id == id),
            None => None,
        };
        if let Some(known) = &known
            && known.status == RefundStatus::Completed
            && completed_total(&refunds) >= reported
        {
            debug!(transaction_id = %id, refund_id = %known.id, "vendor refund already recorded");
            return Ok(tx);
        }

        // A vendor id already attached to a local refund is not reused.
        let mut unused_vendor_id = match known {
            Some(_) => None,
            None => gateway_refund_id,
        };
        let pending = known
            .filter(|r| r.status == RefundStatus::Pending)
            .or_else(|| {
                refunds
                    .iter()
                    .find(|r| r.status == RefundStatus::Pending)
                    .cloned()
            });
        if let Some(pending) = pending
            && completed_total(&refunds) + pending.amount.value() <= reported
        {
            let vendor_id = pending
                .gateway_refund_id
                .clone()
                .or_else(|| unused_vendor_id.take());
            self.settle_refund(pending.id, vendor_id, None).await?;
        }

        let refunds = self.refunds.for_transaction(id).await?;
        let missing = reported - completed_total(&refunds);
        if missing > Decimal::ZERO {
            let amount = Amount::new(missing)?;
            warn!(
                transaction_id = %id,
                %missing,
                "vendor reports a refund with no local record"
            );
            let refund = self
                .reserve_refund(&tx, amount, "Reported by gateway", None)
                .await?;
            self.settle_refund(refund.id, unused_vendor_id, None).await?;
        }

        self.transaction(id).await
    }

    async fn sync_refund_total(&self, id: TransactionId) -> Result<()> {
        let tx = self.transaction(id).await?;
        let total = completed_total(&self.refunds.for_transaction(id).await?);

        if total == tx.amount.value() {
            self.apply_transition(
                id,
                Observation::new(TransactionStatus::Refunded),
                TransitionSource::Refund,
            )
            .await?;
            return Ok(());
        }

        let mut patch = TransactionPatch::status(tx.status);
        patch.refund_amount = Some(to_minor_precision(total));
        if !self
            .transactions
            .update_if_status(id, tx.status, patch)
            .await?
        {
            debug!(transaction_id = %id, "status moved while recording partial refund total");
        }
        Ok(())
    }

    pub async fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))
    }

    pub async fn find_by_payment(
        &self,
        gateway: GatewayKind,
        payment_id: &str,
    ) -> Result<Option<Transaction>> {
        self.transactions.find_by_gateway_id(gateway, payment_id).await
    }

    /// Looks up a transaction by its vendor-assigned id.
    pub async fn transaction_by_payment(
        &self,
        gateway: GatewayKind,
        payment_id: &str,
    ) -> Result<Transaction> {
        self.find_by_payment(gateway, payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("{gateway} payment {payment_id}")))
    }

    pub async fn refund(&self, id: RefundId) -> Result<Refund> {
        self.refunds
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("refund {id}")))
    }

    pub async fn refunds_for(&self, id: TransactionId) -> Result<Vec<Refund>> {
        self.refunds.for_transaction(id).await
    }

    pub async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        self.transactions.get_all().await
    }

    /// Records an audit event; a failing sink is logged and never fails the caller.
    pub async fn audit(&self, event: AuditEvent) {
        if let Err(error) = self.audit.record(event).await {
            warn!(%error, "audit sink rejected event");
        }
    }
}
