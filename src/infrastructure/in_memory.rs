use crate::domain::audit::AuditEvent;
use crate::domain::money::Amount;
use crate::domain::ports::{AuditSink, RefundStore, TransactionStore};
use crate::domain::transaction::{
    GatewayKind, NewRefund, NewTransaction, Refund, RefundId, RefundPatch, RefundReservation,
    RefundStatus, Transaction, TransactionId, TransactionPatch, TransactionStatus, completed_total,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct TransactionTable {
    next_id: u64,
    rows: HashMap<TransactionId, Transaction>,
    by_gateway_ref: HashMap<(GatewayKind, String), TransactionId>,
}

/// A thread-safe in-memory transaction table.
///
/// Uses `Arc<RwLock<..>>` so clones share state. The guarded update runs
/// under the write lock, which makes the status check and the write atomic.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    table: Arc<RwLock<TransactionTable>>,
}

impl InMemoryTransactionStore {
    /// Creates a new, empty in-memory transaction store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: NewTransaction) -> Result<Transaction> {
        let mut table = self.table.write().await;
        let key = (tx.gateway, tx.gateway_transaction_id.clone());
        if table.by_gateway_ref.contains_key(&key) {
            return Err(PaymentError::Duplicate(format!(
                "{} transaction {}",
                key.0, key.1
            )));
        }

        table.next_id += 1;
        let id = TransactionId(table.next_id);
        let record = Transaction::from_new(id, tx, Utc::now());
        table.by_gateway_ref.insert(key, id);
        table.rows.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn find_by_gateway_id(
        &self,
        gateway: GatewayKind,
        gateway_transaction_id: &str,
    ) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .by_gateway_ref
            .get(&(gateway, gateway_transaction_id.to_string()))
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn update_if_status(
        &self,
        id: TransactionId,
        expected: TransactionStatus,
        patch: TransactionPatch,
    ) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(row) if row.status == expected => {
                row.apply(&patch);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PaymentError::NotFound(format!("transaction {id}"))),
        }
    }

    async fn get_all(&self) -> Result<Vec<Transaction>> {
        let table = self.table.read().await;
        let mut all: Vec<Transaction> = table.rows.values().cloned().collect();
        all.sort_by_key(|tx| tx.id);
        Ok(all)
    }
}

#[derive(Default)]
struct RefundTable {
    next_id: u64,
    rows: HashMap<RefundId, Refund>,
}

impl RefundTable {
    fn for_transaction(&self, transaction_id: TransactionId) -> Vec<Refund> {
        let mut refunds: Vec<Refund> = self
            .rows
            .values()
            .filter(|r| r.transaction_id == transaction_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.id);
        refunds
    }
}

/// A thread-safe in-memory refund table.
#[derive(Default, Clone)]
pub struct InMemoryRefundStore {
    table: Arc<RwLock<RefundTable>>,
}

impl InMemoryRefundStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefundStore for InMemoryRefundStore {
    async fn reserve(&self, refund: NewRefund, cap: Amount) -> Result<RefundReservation> {
        let mut table = self.table.write().await;
        let existing = table.for_transaction(refund.transaction_id);
        if existing.iter().any(|r| r.status == RefundStatus::Pending) {
            return Ok(RefundReservation::InProgress);
        }
        let available = cap.value() - completed_total(&existing);
        if refund.amount.value() > available {
            return Ok(RefundReservation::ExceedsBalance { available });
        }

        table.next_id += 1;
        let id = RefundId(table.next_id);
        let record = Refund::from_new(id, refund, Utc::now());
        table.rows.insert(id, record.clone());
        Ok(RefundReservation::Reserved(record))
    }

    async fn get(&self, id: RefundId) -> Result<Option<Refund>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn find_by_gateway_id(&self, gateway_refund_id: &str) -> Result<Option<Refund>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .find(|r| r.gateway_refund_id.as_deref() == Some(gateway_refund_id))
            .cloned())
    }

    async fn for_transaction(&self, transaction_id: TransactionId) -> Result<Vec<Refund>> {
        let table = self.table.read().await;
        Ok(table.for_transaction(transaction_id))
    }

    async fn update_if_status(
        &self,
        id: RefundId,
        expected: RefundStatus,
        patch: RefundPatch,
    ) -> Result<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(row) if row.status == expected => {
                row.apply(&patch);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PaymentError::NotFound(format!("refund {id}"))),
        }
    }
}

/// Audit sink that keeps every event in memory.
#[derive(Default, Clone)]
pub struct MemoryAuditLog {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Number of recorded real status transitions.
    pub async fn transition_count(&self) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.is_transition())
            .count()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
