use super::audit::AuditEvent;
use super::intent::{CaptureParams, CreatedPayment, PaymentIntent, RefundRequest};
use super::money::Amount;
use super::transaction::{
    GatewayKind, NewRefund, NewTransaction, Refund, RefundId, RefundPatch, RefundReservation,
    RefundStatus, Transaction, TransactionId, TransactionPatch, TransactionSnapshot,
    TransactionStatus,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Typed access to the `transactions` table.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a new `pending` transaction. Fails with `Duplicate` when the
    /// gateway already has a transaction with the same vendor id.
    async fn insert(&self, tx: NewTransaction) -> Result<Transaction>;
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;
    async fn find_by_gateway_id(
        &self,
        gateway: GatewayKind,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>>;
    /// Applies `patch` only if the stored status still equals `expected`.
    /// Returns whether the patch was applied.
    async fn update_if_status(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<bool>;
    async fn get_all(&self) -> Result<Vec<Transaction>>;
}

/// Typed access to the `refunds` table.
#[async_trait]
pub trait RefundStore: Send + Sync {
    /// Atomically inserts a `pending` refund unless another refund for the same
    /// transaction is pending, or completed refunds plus this one would exceed `cap`.
    async fn reserve(&self, refund: NewRefund, cap: Amount) -> Result<RefundReservation>;
    async fn get(&self, id: RefundId) -> Result<Option<Refund>>;
    async fn find_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>>;
    async fn for_transaction(&self, transaction_id: TransactionId) -> Result<Vec<Refund>>;
    async fn update_if_status(
        &self,
        id: RefundId,
        expected: RefundStatus,
        patch: RefundPatch,
    ) -> Result<bool>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// The capability contract every gateway adapter satisfies.
///
/// `payment_id` is always the vendor-assigned id (`gateway_transaction_id`).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn kind(&self) -> GatewayKind;
    async fn create(&self, intent: &PaymentIntent) -> Result<CreatedPayment>;
    async fn capture(&self, payment_id: &str, params: &CaptureParams) -> Result<TransactionStatus>;
    async fn verify(&self, payment_id: &str) -> Result<TransactionSnapshot>;
    async fn refund(&self, payment_id: &str, request: &RefundRequest) -> Result<Refund>;
}

pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type RefundStoreRef = Arc<dyn RefundStore>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
